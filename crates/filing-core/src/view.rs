//! # Tiered Report View
//!
//! A read-only projection of a session's field set at a disclosure tier.
//!
//! The view is computed on demand from the stored snapshot and is never the
//! source of truth. [`render_view`] is pure: the same snapshot and tier give
//! the same sections, byte for byte.
//!
//! ## Rules
//!
//! - Sections come from a static, ordered catalogue; each belongs to a tier.
//! - A section whose required fields are missing is omitted outright, so a
//!   missing figure is never shown as zero.
//! - A section above the requested tier is replaced by a placeholder marker
//!   (its id only, no data) so the caller can offer an upgrade.
//! - Content visible at tier `t` is a subset of content at tier `t + 1`.

use crate::error::{FilingError, FilingResult};
use crate::fields::{self, FieldSet, FieldValue};
use crate::money::Cents;
use crate::session::Session;
use crate::types::{FieldKey, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// TIER
// =============================================================================

/// Disclosure tier, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    Teaser = 1,
    Full = 2,
    Complete = 3,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Self::Teaser, Self::Full, Self::Complete];

    #[must_use]
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Tier {
    type Error = FilingError;

    fn try_from(level: u8) -> FilingResult<Self> {
        match level {
            1 => Ok(Self::Teaser),
            2 => Ok(Self::Full),
            3 => Ok(Self::Complete),
            other => Err(FilingError::InvalidInput(format!(
                "tier {other} out of valid range 1..=3"
            ))),
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.level()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

// =============================================================================
// SECTION CATALOGUE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionId {
    Summary,
    FilingStatus,
    Income,
    RentalIncome,
    Deductions,
    TaxComputation,
    Credits,
    FieldLedger,
}

impl SectionId {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::FilingStatus => "filing_status",
            Self::Income => "income",
            Self::RentalIncome => "rental_income",
            Self::Deductions => "deductions",
            Self::TaxComputation => "tax_computation",
            Self::Credits => "credits",
            Self::FieldLedger => "field_ledger",
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field a section cannot render without.
#[derive(Debug, Clone, Copy)]
enum Requirement {
    /// Must be present and hold an amount.
    Amount(&'static str),
    /// Must be present, any kind.
    Present(&'static str),
}

impl Requirement {
    fn met(self, fields: &FieldSet) -> bool {
        match self {
            Self::Amount(key) => fields.amount(key).is_some(),
            Self::Present(key) => fields.contains(key),
        }
    }
}

struct CatalogueEntry {
    id: SectionId,
    tier: Tier,
    title: &'static str,
    requires: &'static [Requirement],
}

use Requirement::{Amount, Present};

/// Tier → section mapping, in render order.
const CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry {
        id: SectionId::Summary,
        tier: Tier::Teaser,
        title: "Refund or balance due",
        requires: &[Amount(fields::TOTAL_TAX), Amount(fields::WITHHOLDING_TOTAL)],
    },
    CatalogueEntry {
        id: SectionId::FilingStatus,
        tier: Tier::Teaser,
        title: "Filing status",
        requires: &[Present(fields::FILING_STATUS)],
    },
    CatalogueEntry {
        id: SectionId::Income,
        tier: Tier::Full,
        title: "Income",
        requires: &[Amount(fields::WAGE_INCOME)],
    },
    CatalogueEntry {
        id: SectionId::RentalIncome,
        tier: Tier::Full,
        title: "Rental income",
        requires: &[Amount(fields::RENTAL_INCOME)],
    },
    CatalogueEntry {
        id: SectionId::Deductions,
        tier: Tier::Full,
        title: "Deductions",
        requires: &[Amount(fields::DEDUCTION_TOTAL)],
    },
    CatalogueEntry {
        id: SectionId::TaxComputation,
        tier: Tier::Full,
        title: "Tax computation",
        requires: &[
            Amount(fields::TOTAL_INCOME),
            Amount(fields::TAXABLE_INCOME),
            Amount(fields::TOTAL_TAX),
        ],
    },
    CatalogueEntry {
        id: SectionId::Credits,
        tier: Tier::Complete,
        title: "Credits",
        requires: &[Amount(fields::CREDIT_TOTAL)],
    },
    CatalogueEntry {
        id: SectionId::FieldLedger,
        tier: Tier::Complete,
        title: "All reported fields",
        requires: &[],
    },
];

/// Sections the catalogue permits at `tier`, in render order.
#[must_use]
pub fn permitted_sections(tier: Tier) -> Vec<SectionId> {
    CATALOGUE
        .iter()
        .filter(|s| s.tier <= tier)
        .map(|s| s.id)
        .collect()
}

// =============================================================================
// VIEW PAYLOAD
// =============================================================================

/// Value of one rendered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineValue {
    Amount(Cents),
    Text(String),
    Flag(bool),
    /// A ratio in basis points (1/100 of a percent).
    RateBps(i64),
}

impl From<&FieldValue> for LineValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Amount(c) => Self::Amount(*c),
            FieldValue::Text(t) => Self::Text(t.clone()),
            FieldValue::Flag(b) => Self::Flag(*b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub key: String,
    pub value: LineValue,
}

impl LineItem {
    fn new(key: impl Into<String>, value: LineValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    pub lines: Vec<LineItem>,
}

/// The rendered projection handed to the rendering collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportView {
    pub session_id: SessionId,
    pub tier: Tier,
    /// Step of the snapshot this view was derived from.
    pub step: u64,
    pub sections: Vec<Section>,
    /// Sections available at a higher tier; ids only, no data.
    pub locked: Vec<SectionId>,
}

impl ReportView {
    /// Ids of the rendered sections, in order.
    #[must_use]
    pub fn section_ids(&self) -> Vec<SectionId> {
        self.sections.iter().map(|s| s.id).collect()
    }

    #[must_use]
    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Deterministic binary encoding of the view.
    pub fn canonical_bytes(&self) -> FilingResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| FilingError::Serialization(e.to_string()))
    }
}

// =============================================================================
// RENDERING
// =============================================================================

/// Render `session` at `tier`.
///
/// Fails with [`FilingError::InsufficientData`] when no computed tax result
/// is present; nothing partial is returned in that case.
pub fn render_view(session: &Session, tier: Tier) -> FilingResult<ReportView> {
    let fields = &session.fields;
    if fields.computed_results().is_empty() {
        return Err(FilingError::InsufficientData {
            missing: fields::COMPUTED_RESULT_KEYS
                .iter()
                .copied()
                .map(FieldKey::from_static)
                .collect(),
        });
    }

    let mut sections = Vec::new();
    let mut locked = Vec::new();
    for entry in CATALOGUE {
        if !entry.requires.iter().all(|r| r.met(fields)) {
            continue;
        }
        if entry.tier > tier {
            locked.push(entry.id);
            continue;
        }
        sections.push(Section {
            id: entry.id,
            title: entry.title.to_owned(),
            lines: section_lines(entry.id, fields),
        });
    }

    Ok(ReportView {
        session_id: session.id.clone(),
        tier,
        step: session.step,
        sections,
        locked,
    })
}

fn amount_line(fields: &FieldSet, key: &'static str) -> Option<LineItem> {
    fields
        .amount(key)
        .map(|c| LineItem::new(key, LineValue::Amount(c)))
}

fn section_lines(id: SectionId, fields: &FieldSet) -> Vec<LineItem> {
    match id {
        SectionId::Summary => {
            let tax = fields.amount(fields::TOTAL_TAX).unwrap_or_default();
            let withheld = fields.amount(fields::WITHHOLDING_TOTAL).unwrap_or_default();
            let credits = fields.amount(fields::CREDIT_TOTAL).unwrap_or_default();
            let balance = withheld.saturating_add(credits).saturating_sub(tax);
            let outcome = if balance.is_negative() {
                LineItem::new("amount_owed", LineValue::Amount(balance.abs()))
            } else {
                LineItem::new("refund", LineValue::Amount(balance))
            };
            vec![
                LineItem::new(fields::TOTAL_TAX, LineValue::Amount(tax)),
                LineItem::new(fields::WITHHOLDING_TOTAL, LineValue::Amount(withheld)),
                outcome,
            ]
        }
        SectionId::FilingStatus => fields
            .get_static(fields::FILING_STATUS)
            .map(|v| vec![LineItem::new(fields::FILING_STATUS, LineValue::from(v))])
            .unwrap_or_default(),
        SectionId::Income => {
            let mut lines: Vec<LineItem> = [
                fields::WAGE_INCOME,
                fields::INTEREST_INCOME,
                fields::DIVIDEND_INCOME,
            ]
            .into_iter()
            .filter_map(|k| amount_line(fields, k))
            .collect();
            let subtotal = Cents::sum(lines.iter().filter_map(|l| match l.value {
                LineValue::Amount(c) => Some(c),
                _ => None,
            }));
            lines.push(LineItem::new("income_subtotal", LineValue::Amount(subtotal)));
            lines
        }
        SectionId::RentalIncome => amount_line(fields, fields::RENTAL_INCOME)
            .into_iter()
            .collect(),
        SectionId::Deductions => amount_line(fields, fields::DEDUCTION_TOTAL)
            .into_iter()
            .collect(),
        SectionId::TaxComputation => {
            let mut lines: Vec<LineItem> = [
                fields::TOTAL_INCOME,
                fields::TAXABLE_INCOME,
                fields::TOTAL_TAX,
            ]
            .into_iter()
            .filter_map(|k| amount_line(fields, k))
            .collect();
            let total_income = fields.amount(fields::TOTAL_INCOME).unwrap_or_default();
            let tax = fields.amount(fields::TOTAL_TAX).unwrap_or_default();
            if let Some(rate) = tax.ratio_bps(total_income) {
                lines.push(LineItem::new("effective_rate", LineValue::RateBps(rate)));
            }
            lines
        }
        SectionId::Credits => amount_line(fields, fields::CREDIT_TOTAL)
            .into_iter()
            .collect(),
        SectionId::FieldLedger => fields
            .iter()
            .map(|(k, v)| LineItem::new(k.as_str(), LineValue::from(v)))
            .collect(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ownership, Timestamp};
    use crate::workflow::WorkflowType;

    fn session_with(fields: FieldSet) -> Session {
        let mut s = Session::new(
            SessionId::sequential(1),
            Ownership::Anonymous,
            WorkflowType::Unified,
            Timestamp(0),
        );
        s.fields = fields;
        s
    }

    fn full_fields() -> FieldSet {
        FieldSet::new()
            .with(fields::FILING_STATUS, FieldValue::Text("single".into()))
            .with(fields::WAGE_INCOME, FieldValue::Amount(Cents::dollars(60_000)))
            .with(fields::INTEREST_INCOME, FieldValue::Amount(Cents::dollars(500)))
            .with(fields::RENTAL_INCOME, FieldValue::Amount(Cents::dollars(12_000)))
            .with(fields::DEDUCTION_TOTAL, FieldValue::Amount(Cents::dollars(14_600)))
            .with(fields::TOTAL_INCOME, FieldValue::Amount(Cents::dollars(72_500)))
            .with(fields::TAXABLE_INCOME, FieldValue::Amount(Cents::dollars(57_900)))
            .with(fields::TOTAL_TAX, FieldValue::Amount(Cents::new(794_350)))
            .with(fields::WITHHOLDING_TOTAL, FieldValue::Amount(Cents::dollars(9_000)))
            .with(fields::CREDIT_TOTAL, FieldValue::Amount(Cents::dollars(500)))
    }

    #[test]
    fn no_computed_fields_is_insufficient() {
        let s = session_with(FieldSet::new().with(
            fields::WAGE_INCOME,
            FieldValue::Amount(Cents::dollars(1)),
        ));
        let err = render_view(&s, Tier::Teaser).expect_err("insufficient");
        match err {
            FilingError::InsufficientData { missing } => assert_eq!(missing.len(), 3),
            other => unreachable!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn teaser_locks_higher_sections() {
        let view = render_view(&session_with(full_fields()), Tier::Teaser).expect("view");
        assert_eq!(
            view.section_ids(),
            vec![SectionId::Summary, SectionId::FilingStatus]
        );
        assert!(view.locked.contains(&SectionId::RentalIncome));
        assert!(view.locked.contains(&SectionId::FieldLedger));
    }

    #[test]
    fn complete_tier_shows_everything() {
        let view = render_view(&session_with(full_fields()), Tier::Complete).expect("view");
        assert_eq!(view.section_ids(), permitted_sections(Tier::Complete));
        assert!(view.locked.is_empty());
    }

    #[test]
    fn summary_balance_is_refund_when_positive() {
        let view = render_view(&session_with(full_fields()), Tier::Teaser).expect("view");
        let summary = view.section(SectionId::Summary).expect("summary");
        // 9000 + 500 - 7943.50 = 1556.50
        assert_eq!(
            summary.lines.last(),
            Some(&LineItem::new("refund", LineValue::Amount(Cents::new(155_650))))
        );
    }

    #[test]
    fn effective_rate_in_basis_points() {
        let view = render_view(&session_with(full_fields()), Tier::Full).expect("view");
        let comp = view.section(SectionId::TaxComputation).expect("tax computation");
        // 7943.50 / 72500 = 10.9566% -> 1096 bps
        assert_eq!(
            comp.lines.last(),
            Some(&LineItem::new("effective_rate", LineValue::RateBps(1096)))
        );
    }

    #[test]
    fn locked_sections_carry_no_data() {
        let view = render_view(&session_with(full_fields()), Tier::Teaser).expect("view");
        assert!(view.section(SectionId::Credits).is_none());
        assert!(view.locked.contains(&SectionId::Credits));
    }

    #[test]
    fn tier_parses_from_level() {
        assert_eq!(Tier::try_from(2).ok(), Some(Tier::Full));
        assert!(Tier::try_from(0).is_err());
        assert!(Tier::try_from(4).is_err());
    }
}
