//! JSON and CSV export of a lead set.
//!
//! CSV flattens each lead to one row; only the first contact is included.

use std::io::{self, Write};

use crate::types::lead::{ArmedStatus, Lead};

/// CSV header, in column order.
pub const CSV_COLUMNS: [&str; 17] = [
    "id",
    "source",
    "source_url",
    "lead_type",
    "status",
    "confidence_score",
    "date_extracted",
    "organization_name",
    "organization_is_government",
    "contact_email",
    "contact_phone",
    "opportunity_title",
    "opportunity_type",
    "opportunity_location",
    "opportunity_state",
    "opportunity_is_armed",
    "opportunity_end_date",
];

/// Pretty-printed JSON array of full leads.
pub fn to_json(leads: &[Lead]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(leads)
}

/// CSV document with a header row.
pub fn to_csv(leads: &[Lead]) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail
    let _ = write_csv(&mut out, leads);
    String::from_utf8_lossy(&out).into_owned()
}

/// Stream CSV rows to any writer.
pub fn write_csv<W: Write>(mut w: W, leads: &[Lead]) -> io::Result<()> {
    let header: Vec<String> = CSV_COLUMNS.iter().map(|c| c.to_string()).collect();
    write_row(&mut w, &header)?;
    for lead in leads {
        write_row(&mut w, &csv_row(lead))?;
    }
    Ok(())
}

fn csv_row(lead: &Lead) -> Vec<String> {
    let contact = lead.contacts.first();
    let opp = &lead.opportunity;
    let armed = match opp.is_armed {
        ArmedStatus::Armed => "armed",
        ArmedStatus::Unarmed => "unarmed",
        ArmedStatus::Unknown => "",
    };

    vec![
        lead.id.to_string(),
        lead.source.clone(),
        lead.source_url.clone(),
        lead.lead_type.as_str().to_string(),
        lead.status.as_str().to_string(),
        format!("{:.2}", lead.confidence_score),
        lead.date_extracted.to_rfc3339(),
        lead.organization.name.clone(),
        lead.organization.is_government.to_string(),
        contact.and_then(|c| c.email.clone()).unwrap_or_default(),
        contact.and_then(|c| c.phone.clone()).unwrap_or_default(),
        opp.title.clone(),
        opp.opportunity_type.as_str().to_string(),
        opp.location.clone().unwrap_or_default(),
        opp.state.clone().unwrap_or_default(),
        armed.to_string(),
        opp.end_date.map(|d| d.to_string()).unwrap_or_default(),
    ]
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(w: &mut W, row: &[String]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::lead_fixture;
    use crate::types::lead::Contact;

    #[test]
    fn test_csv_quotes_separators_and_quotes() {
        let mut lead = lead_fixture("bidnetdirect", "Acme \"Shield\" Corp", "Guards, Night Shift", 0.8);
        lead.contacts.push(Contact::with_email("jane@acme.com"));
        lead.opportunity.is_armed = ArmedStatus::Unarmed;

        let csv = to_csv(&[lead]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));

        let row = lines.next().unwrap();
        assert!(row.contains("\"Acme \"\"Shield\"\" Corp\""));
        assert!(row.contains("\"Guards, Night Shift\""));
        assert!(row.contains(",jane@acme.com,,"));
        assert!(row.contains(",0.80,"));
        assert!(row.contains("\"Austin, TX\""));
        assert!(row.contains(",unarmed,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_csv_multiline_cell_stays_one_record() {
        let lead = lead_fixture("usajobs", "Travis County", "Guard\nOvernight", 0.5);
        let csv = to_csv(&[lead]);
        assert!(csv.contains("\"Guard\nOvernight\""));
    }

    #[test]
    fn test_json_round_trips_leads() {
        let leads = vec![lead_fixture("usajobs", "Travis County", "Guard", 0.5)];
        let json = to_json(&leads).unwrap();
        let parsed: Vec<Lead> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, leads);
    }

    #[test]
    fn test_empty_export() {
        assert_eq!(to_csv(&[]).lines().count(), 1);
        assert_eq!(to_json(&[]).unwrap(), "[]");
    }
}
