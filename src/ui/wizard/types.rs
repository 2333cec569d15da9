//! Type definitions for the listing wizard

use serde::{Deserialize, Serialize};

/// Storage form key of the listing workflow
pub const LISTING_FORM_KEY: &str = "business_listing";

/// Longest value any listing field accepts
pub const MAX_FIELD_LENGTH: usize = 80;

/// Longest accepted money amount, in digits
pub const MAX_AMOUNT_DIGITS: usize = 12;

/// A business-for-sale listing as typed by the user.
///
/// Amounts stay as the raw digit strings typed so that a half-finished draft
/// round-trips exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingDraft {
    pub title: String,
    pub industry: String,
    pub asking_price: String,
    pub annual_revenue: String,
    pub city: String,
    pub region: String,
}

impl ListingDraft {
    /// Draft validator: restored drafts with over-long fields are discarded
    pub fn is_within_limits(&self) -> bool {
        FieldId::all()
            .iter()
            .all(|field| field.get(self).chars().count() <= field.max_length())
    }
}

/// Wizard steps in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Business,
    Financials,
    Location,
    Review,
}

impl WizardStep {
    pub fn all() -> &'static [WizardStep] {
        &[
            WizardStep::Business,
            WizardStep::Financials,
            WizardStep::Location,
            WizardStep::Review,
        ]
    }

    /// Step identifier recorded in the completed-step set
    pub fn id(&self) -> &'static str {
        match self {
            WizardStep::Business => "business",
            WizardStep::Financials => "financials",
            WizardStep::Location => "location",
            WizardStep::Review => "review",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::all().iter().copied().find(|step| step.id() == id)
    }

    pub fn title(&self) -> &'static str {
        match self {
            WizardStep::Business => "Business",
            WizardStep::Financials => "Financials",
            WizardStep::Location => "Location",
            WizardStep::Review => "Review",
        }
    }

    pub fn fields(&self) -> &'static [FieldId] {
        match self {
            WizardStep::Business => &[FieldId::Title, FieldId::Industry],
            WizardStep::Financials => &[FieldId::AskingPrice, FieldId::AnnualRevenue],
            WizardStep::Location => &[FieldId::City, FieldId::Region],
            WizardStep::Review => &[],
        }
    }

    /// Problems that block completing this step
    pub fn errors(&self, draft: &ListingDraft) -> Vec<String> {
        let mut errors = Vec::new();
        for field in self.fields() {
            let value = field.get(draft).trim();
            if field.required() && value.is_empty() {
                errors.push(format!("{} is required", field.label()));
            } else if field.is_amount()
                && !value.is_empty()
                && !value.chars().all(|c| c.is_ascii_digit())
            {
                errors.push(format!("{} must be a whole number", field.label()));
            }
        }

        if *self == WizardStep::Review {
            for step in &Self::all()[..3] {
                if !step.errors(draft).is_empty() {
                    errors.push(format!("{} step is incomplete", step.title()));
                }
            }
        }
        errors
    }
}

/// Editable listing fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldId {
    Title,
    Industry,
    AskingPrice,
    AnnualRevenue,
    City,
    Region,
}

impl FieldId {
    pub fn all() -> &'static [FieldId] {
        &[
            FieldId::Title,
            FieldId::Industry,
            FieldId::AskingPrice,
            FieldId::AnnualRevenue,
            FieldId::City,
            FieldId::Region,
        ]
    }

    /// JSON member name within [`ListingDraft`]
    pub fn key(&self) -> &'static str {
        match self {
            FieldId::Title => "title",
            FieldId::Industry => "industry",
            FieldId::AskingPrice => "asking_price",
            FieldId::AnnualRevenue => "annual_revenue",
            FieldId::City => "city",
            FieldId::Region => "region",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FieldId::Title => "Business name",
            FieldId::Industry => "Industry",
            FieldId::AskingPrice => "Asking price",
            FieldId::AnnualRevenue => "Annual revenue",
            FieldId::City => "City",
            FieldId::Region => "Region",
        }
    }

    pub fn placeholder(&self) -> &'static str {
        match self {
            FieldId::Title => "e.g. Harbour Street Bakery",
            FieldId::Industry => "e.g. Food & beverage",
            FieldId::AskingPrice => "Whole amount, digits only",
            FieldId::AnnualRevenue => "Optional, digits only",
            FieldId::City => "e.g. Bristol",
            FieldId::Region => "Optional",
        }
    }

    pub fn required(&self) -> bool {
        !matches!(self, FieldId::AnnualRevenue | FieldId::Region)
    }

    pub fn is_amount(&self) -> bool {
        matches!(self, FieldId::AskingPrice | FieldId::AnnualRevenue)
    }

    pub fn max_length(&self) -> usize {
        if self.is_amount() {
            MAX_AMOUNT_DIGITS
        } else {
            MAX_FIELD_LENGTH
        }
    }

    pub fn get<'a>(&self, draft: &'a ListingDraft) -> &'a str {
        match self {
            FieldId::Title => &draft.title,
            FieldId::Industry => &draft.industry,
            FieldId::AskingPrice => &draft.asking_price,
            FieldId::AnnualRevenue => &draft.annual_revenue,
            FieldId::City => &draft.city,
            FieldId::Region => &draft.region,
        }
    }
}

/// Result of wizard key handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardAction {
    /// Keep running
    Continue,
    /// Pending writes flushed; leave the draft for next time
    Quit,
    /// User discarded the saved draft from the restore prompt
    Discarded,
    /// Listing submitted; its draft has been cleared
    Completed(ListingDraft),
}
