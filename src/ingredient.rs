use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    // CAS registry numbers: 2-7 digits, 2 digits, check digit.
    static ref CAS_REGEX: Regex = Regex::new(r"^\d{2,7}-\d{2}-\d$").unwrap();
}

/// Check whether a string is shaped like a CAS registry number.
///
/// Used for logging suspicious rows during parsing; a failed check is
/// never fatal, since customers routinely upload sheets with ranges or
/// placeholder text in the CAS column.
pub fn is_valid_cas(value: &str) -> bool {
    CAS_REGEX.is_match(value.trim())
}

fn default_true() -> bool {
    true
}

/// One constituent row of a formula, as edited in the review screen.
///
/// The five reference fields at the bottom are filled in by the
/// auto-complete pass from the master table and copied verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    #[serde(default)]
    pub cas_number: String,

    /// Display (INCI) name.
    #[serde(default)]
    pub inci_name: String,

    /// Concentration percentage, free text and unit-less.
    #[serde(default)]
    pub concentration: String,

    /// Compliance flag. Defaults to true; auto-complete forces it to
    /// false when the CAS number cannot be resolved.
    #[serde(default = "default_true")]
    pub compliant: bool,

    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub chemical_name: String,

    #[serde(default)]
    pub aics_listed: String,

    /// Specific information requirement code.
    #[serde(default)]
    pub sir: String,

    #[serde(default)]
    pub susmp: String,

    #[serde(default)]
    pub nzoic: String,
}

impl Ingredient {
    /// An empty editable row, compliant by default.
    pub fn placeholder() -> Self {
        Ingredient {
            cas_number: String::new(),
            inci_name: String::new(),
            concentration: String::new(),
            compliant: true,
            notes: String::new(),
            chemical_name: String::new(),
            aics_listed: String::new(),
            sir: String::new(),
            susmp: String::new(),
            nzoic: String::new(),
        }
    }

    /// A row freshly parsed from an uploaded sheet, before auto-complete.
    pub fn from_parsed(cas_number: &str, inci_name: &str, concentration: &str) -> Self {
        Ingredient {
            cas_number: cas_number.trim().to_string(),
            inci_name: inci_name.trim().to_string(),
            concentration: concentration.trim().to_string(),
            ..Ingredient::placeholder()
        }
    }
}

impl Default for Ingredient {
    fn default() -> Self {
        Ingredient::placeholder()
    }
}

/// One reference record in the master compliance table, keyed by CAS
/// number. All fields are stored verbatim from the uploaded sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterIngredient {
    pub cas_number: String,
    pub chemical_name: String,
    pub aics_listed: String,
    pub sir: String,
    pub susmp: String,
    pub nzoic: String,
}

/// The editable payload of a review: notes, header fields and the
/// ordered ingredient list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewData {
    #[serde(default)]
    pub review_notes: String,

    #[serde(default)]
    pub product_name: String,

    #[serde(default)]
    pub formula_number: String,

    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

/// Rebuild a well-formed [`ReviewData`] from whatever was stored.
///
/// The review editor must always receive a complete payload: every
/// string field defaults to empty, malformed ingredient entries are
/// dropped, and an empty or missing ingredient list is replaced with a
/// single placeholder row. Accepts any JSON value, or `None` when no
/// review exists yet.
pub fn ensure_review_data_format(raw: Option<Value>) -> ReviewData {
    let value = raw.unwrap_or(Value::Null);

    let mut data = ReviewData {
        review_notes: string_field(&value, "review_notes"),
        product_name: string_field(&value, "product_name"),
        formula_number: string_field(&value, "formula_number"),
        ingredients: Vec::new(),
    };

    if let Some(entries) = value.get("ingredients").and_then(Value::as_array) {
        for entry in entries {
            if let Ok(ingredient) = serde_json::from_value::<Ingredient>(entry.clone()) {
                data.ingredients.push(ingredient);
            }
        }
    }

    if data.ingredients.is_empty() {
        data.ingredients.push(Ingredient::placeholder());
    }

    data
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
