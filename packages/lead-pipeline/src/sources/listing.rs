//! CSS-selector driven adapter for public listing pages.
//!
//! One [`ListingSource`] per site, configured by a [`SelectorProfile`] that
//! says where the items are and which fields each item carries. Anything the
//! profile does not map is passed on as free text for the extractor.

use async_stream::stream;
use futures::stream::BoxStream;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::{FetchResult, ParseError, ParseResult};
use crate::sources::http::{get_document, resolve_link};
use crate::traits::source::{FetchContext, SourceAdapter};
use crate::types::candidate::{CandidateLead, RawDocument};
use crate::types::config::SourceConfig;
use crate::types::lead::LeadType;

/// Where a listing page keeps its items and fields.
#[derive(Debug, Clone)]
pub struct SelectorProfile {
    /// One match per listing item
    pub item: String,
    pub title: String,
    pub organization: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    /// Anchor whose href is the item's detail page
    pub link: Option<String>,
    /// Anchor to the next results page
    pub next_page: Option<String>,
}

impl SelectorProfile {
    pub fn new(item: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            title: title.into(),
            organization: None,
            location: None,
            description: None,
            link: None,
            next_page: None,
        }
    }

    pub fn with_organization(mut self, selector: impl Into<String>) -> Self {
        self.organization = Some(selector.into());
        self
    }

    pub fn with_location(mut self, selector: impl Into<String>) -> Self {
        self.location = Some(selector.into());
        self
    }

    pub fn with_description(mut self, selector: impl Into<String>) -> Self {
        self.description = Some(selector.into());
        self
    }

    pub fn with_link(mut self, selector: impl Into<String>) -> Self {
        self.link = Some(selector.into());
        self
    }

    pub fn with_next_page(mut self, selector: impl Into<String>) -> Self {
        self.next_page = Some(selector.into());
        self
    }
}

fn selector(raw: &str) -> ParseResult<Selector> {
    Selector::parse(raw).map_err(|e| ParseError::Selector {
        selector: raw.to_string(),
        reason: e.to_string(),
    })
}

fn optional_selector(raw: &Option<String>) -> ParseResult<Option<Selector>> {
    raw.as_deref().map(selector).transpose()
}

/// Element text with whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(item: ElementRef<'_>, sel: &Option<Selector>) -> Option<String> {
    let sel = sel.as_ref()?;
    item.select(sel)
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Item text split on block boundaries so contact lines stay separate.
fn block_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A public listing page scraped with CSS selectors.
#[derive(Debug, Clone)]
pub struct ListingSource {
    name: String,
    lead_type: LeadType,
    profile: SelectorProfile,
}

impl ListingSource {
    pub fn new(name: impl Into<String>, lead_type: LeadType, profile: SelectorProfile) -> Self {
        Self {
            name: name.into(),
            lead_type,
            profile,
        }
    }

    /// BidNet Direct open solicitations.
    pub fn bidnetdirect() -> Self {
        Self::new(
            "bidnetdirect",
            LeadType::Rfp,
            SelectorProfile::new("tr.mets-table-row, div.solicitation-item", ".solicitation-title, a.solicitationsTitleLink")
                .with_organization(".buyer-name, .solicitation-agency")
                .with_location(".solicitation-location, .region")
                .with_description(".solicitation-description, .description")
                .with_link("a.solicitationsTitleLink, .solicitation-title a")
                .with_next_page("a.next, a[rel=next]"),
        )
    }

    /// InstantMarkets search results.
    pub fn instantmarkets() -> Self {
        Self::new(
            "instantmarkets",
            LeadType::Rfp,
            SelectorProfile::new("div.search-result, div.opportunity-item", "h3, .opportunity-title")
                .with_organization(".agency-name, .opportunity-agency")
                .with_location(".location, .opportunity-location")
                .with_description(".summary, .opportunity-description")
                .with_link("h3 a, a.opportunity-link")
                .with_next_page("a[rel=next], li.next a"),
        )
    }

    /// SecurityJobs.net job board.
    pub fn securityjobsnet() -> Self {
        Self::new(
            "securityjobsnet",
            LeadType::JobPosting,
            SelectorProfile::new("div.job-listing, li.job", ".job-title, h2")
                .with_organization(".company, .employer")
                .with_location(".job-location, .location")
                .with_description(".job-description, .excerpt")
                .with_link(".job-title a, h2 a")
                .with_next_page("a.next-page, a[rel=next]"),
        )
    }

    pub fn profile(&self) -> &SelectorProfile {
        &self.profile
    }

    /// Next results page linked from a document, if the profile knows how.
    fn next_page_url(&self, document: &RawDocument) -> Option<String> {
        let sel = self.profile.next_page.as_deref().and_then(|s| Selector::parse(s).ok())?;
        let html = Html::parse_document(&document.content);
        let href = html
            .select(&sel)
            .find_map(|a| a.value().attr("href").map(str::to_string))?;
        resolve_link(&document.url, &href).filter(|next| *next != document.url)
    }
}

impl SourceAdapter for ListingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lead_type(&self) -> LeadType {
        self.lead_type
    }

    fn fetch<'a>(
        &'a self,
        config: &'a SourceConfig,
        ctx: &'a FetchContext,
    ) -> BoxStream<'a, FetchResult<RawDocument>> {
        Box::pin(stream! {
            let mut url = config.url.clone();
            let mut fetched = 0usize;
            loop {
                let document = match get_document(ctx, &url).await {
                    Ok(doc) => doc,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                fetched += 1;

                // Html is not Send; resolve the next link before yielding
                let next = self.next_page_url(&document);
                debug!(source = %self.name, url = %url, has_next = next.is_some(), "fetched listing page");
                yield Ok(document);

                match next {
                    Some(next) if fetched < config.max_documents => url = next,
                    _ => break,
                }
            }
        })
    }

    fn parse(&self, document: &RawDocument) -> ParseResult<Vec<CandidateLead>> {
        let item_sel = selector(&self.profile.item)?;
        let title_sel = Some(selector(&self.profile.title)?);
        let org_sel = optional_selector(&self.profile.organization)?;
        let location_sel = optional_selector(&self.profile.location)?;
        let description_sel = optional_selector(&self.profile.description)?;
        let link_sel = optional_selector(&self.profile.link)?;

        let html = Html::parse_document(&document.content);
        let mut candidates = Vec::new();

        for item in html.select(&item_sel) {
            let Some(title) = first_text(item, &title_sel) else {
                continue;
            };

            let url = link_sel
                .as_ref()
                .and_then(|sel| item.select(sel).find_map(|a| a.value().attr("href")))
                .and_then(|href| resolve_link(&document.url, href))
                .unwrap_or_else(|| document.url.clone());

            let mut candidate = CandidateLead::new(&self.name, url, self.lead_type)
                .with_title(title)
                .with_text(block_text(item));

            if let Some(org) = first_text(item, &org_sel) {
                candidate = candidate.with_organization(org);
            }
            if let Some(location) = first_text(item, &location_sel) {
                candidate = candidate.with_location(location);
            }
            if let Some(description) = first_text(item, &description_sel) {
                candidate = candidate.with_description(description);
            }

            candidates.push(candidate);
        }

        Ok(candidates)
    }
}
