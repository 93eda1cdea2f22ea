//! USAJOBS search API adapter.
//!
//! Pages through the JSON search endpoint and maps each posting to a
//! government job-posting candidate.

use async_stream::stream;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{FetchError, FetchResult, ParseError, ParseResult};
use crate::sources::http::get_document;
use crate::traits::source::{FetchContext, SourceAdapter};
use crate::types::candidate::{CandidateLead, RawDocument};
use crate::types::config::SourceConfig;
use crate::types::lead::LeadType;

const RESULTS_PER_PAGE: u32 = 25;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResponse {
    search_result: SearchResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResult {
    #[serde(default)]
    search_result_items: Vec<SearchItem>,
    #[serde(default)]
    user_area: Option<SearchUserArea>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchUserArea {
    #[serde(default)]
    number_of_pages: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchItem {
    matched_object_descriptor: Descriptor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Descriptor {
    position_title: String,
    #[serde(rename = "PositionURI")]
    position_uri: String,
    organization_name: String,
    department_name: String,
    position_location_display: String,
    qualification_summary: String,
    position_start_date: String,
    position_end_date: String,
    position_remuneration: Vec<Remuneration>,
    user_area: Option<DescriptorUserArea>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Remuneration {
    minimum_range: String,
    maximum_range: String,
    rate_interval_code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescriptorUserArea {
    details: Option<Details>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Details {
    job_summary: String,
    major_duties: Vec<String>,
}

/// Adapter for the USAJOBS search API.
#[derive(Debug, Default)]
pub struct UsaJobsSource;

impl UsaJobsSource {
    pub const NAME: &'static str = "usajobs";

    pub fn new() -> Self {
        Self
    }

    fn page_url(base: &str, page: u32) -> FetchResult<String> {
        let mut url = Url::parse(base).map_err(|_| FetchError::InvalidUrl {
            url: base.to_string(),
        })?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "Page" && k != "ResultsPerPage")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("ResultsPerPage", &RESULTS_PER_PAGE.to_string())
            .append_pair("Page", &page.to_string());
        Ok(url.to_string())
    }

    fn number_of_pages(document: &RawDocument) -> u32 {
        serde_json::from_str::<SearchResponse>(&document.content)
            .ok()
            .and_then(|r| r.search_result.user_area)
            .and_then(|a| a.number_of_pages)
            .and_then(|n| n.parse().ok())
            .unwrap_or(1)
    }

    fn to_candidate(&self, item: Descriptor, fallback_url: &str) -> CandidateLead {
        let url = if item.position_uri.is_empty() {
            fallback_url.to_string()
        } else {
            item.position_uri.clone()
        };

        let org_name = if item.organization_name.trim().is_empty() {
            item.department_name.clone()
        } else {
            item.organization_name.clone()
        };

        let details = item.user_area.and_then(|a| a.details).unwrap_or_default();
        let mut description = details.job_summary;
        if !details.major_duties.is_empty() {
            if !description.is_empty() {
                description.push('\n');
            }
            description.push_str(&details.major_duties.join("\n"));
        }

        let mut candidate = CandidateLead::new(Self::NAME, url, LeadType::JobPosting)
            .with_organization(org_name)
            .with_title(item.position_title);

        candidate.organization.is_government = true;
        if !item.department_name.is_empty() && item.department_name != candidate.organization.name {
            candidate.organization.description = Some(item.department_name);
        }
        if !description.trim().is_empty() {
            candidate.opportunity.description = Some(description);
        }
        if !item.qualification_summary.trim().is_empty() {
            candidate.opportunity.requirements = Some(item.qualification_summary);
        }
        if !item.position_location_display.trim().is_empty() {
            candidate.opportunity.location = Some(item.position_location_display);
        }
        candidate.opportunity.start_date = parse_api_date(&item.position_start_date);
        candidate.opportunity.end_date = parse_api_date(&item.position_end_date);
        candidate.opportunity.estimated_value = item
            .position_remuneration
            .first()
            .filter(|r| !r.minimum_range.is_empty())
            .map(format_pay);

        candidate
    }
}

fn parse_api_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn format_pay(pay: &Remuneration) -> String {
    let interval = match pay.rate_interval_code.as_str() {
        "PA" => " per year",
        "PH" => " per hour",
        _ => "",
    };
    if pay.maximum_range.is_empty() || pay.maximum_range == pay.minimum_range {
        format!("${}{interval}", pay.minimum_range)
    } else {
        format!("${} - ${}{interval}", pay.minimum_range, pay.maximum_range)
    }
}

impl SourceAdapter for UsaJobsSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn lead_type(&self) -> LeadType {
        LeadType::JobPosting
    }

    fn fetch<'a>(
        &'a self,
        config: &'a SourceConfig,
        ctx: &'a FetchContext,
    ) -> BoxStream<'a, FetchResult<RawDocument>> {
        Box::pin(stream! {
            let mut page = 1u32;
            loop {
                let url = match Self::page_url(&config.url, page) {
                    Ok(url) => url,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let document = match get_document(ctx, &url).await {
                    Ok(doc) => doc.with_metadata("page", page.to_string()),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let pages = Self::number_of_pages(&document);
                debug!(source = Self::NAME, page, pages, "fetched result page");
                yield Ok(document);

                if page >= pages || page as usize >= config.max_documents {
                    break;
                }
                page += 1;
            }
        })
    }

    fn parse(&self, document: &RawDocument) -> ParseResult<Vec<CandidateLead>> {
        let response: SearchResponse =
            serde_json::from_str(&document.content).map_err(|source| ParseError::Json {
                url: document.url.clone(),
                source,
            })?;

        Ok(response
            .search_result
            .search_result_items
            .into_iter()
            .map(|item| self.to_candidate(item.matched_object_descriptor, &document.url))
            .filter(|c| !c.opportunity.title.trim().is_empty())
            .collect())
    }
}
