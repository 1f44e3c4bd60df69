use log::warn;

use crate::error::PortalError;
use crate::ingredient::{Ingredient, MasterIngredient};

/// Note written onto a row whose CAS number has no master record.
pub const NOTE_CAS_NOT_FOUND: &str = "CAS not found";

/// Note written onto a row whose lookup failed outright.
pub const NOTE_LOOKUP_ERROR: &str = "Error retrieving data";

/// Point lookup into the master compliance table.
///
/// Implemented by the store for production use and by plain maps in
/// tests. `Ok(None)` means the CAS number is simply absent, which is an
/// expected outcome; `Err` means the lookup itself failed.
pub trait MasterLookup {
    fn find_by_cas(&self, cas: &str) -> Result<Option<MasterIngredient>, PortalError>;
}

impl MasterLookup for std::collections::HashMap<String, MasterIngredient> {
    fn find_by_cas(&self, cas: &str) -> Result<Option<MasterIngredient>, PortalError> {
        Ok(self.get(cas).cloned())
    }
}

/// Enrich parsed ingredient rows from the master table.
///
/// Rows are processed sequentially in input order, one lookup per row.
/// A resolved CAS number overwrites the five reference fields verbatim
/// and marks the row compliant. An unresolved or empty CAS number, or a
/// failed lookup, marks the row non-compliant with the matching note
/// and otherwise leaves it untouched. The function has no persistence
/// side effects; saving the result is the review builder's job.
///
/// # Arguments
/// * `lookup` - Master table access
/// * `ingredients` - Parsed or manually entered rows, in display order
///
/// # Returns
/// * `Vec<Ingredient>` - The same rows, enriched, in the same order
pub fn auto_complete<L: MasterLookup>(lookup: &L, mut ingredients: Vec<Ingredient>) -> Vec<Ingredient> {
    for ingredient in ingredients.iter_mut() {
        let cas = ingredient.cas_number.trim().to_string();

        if cas.is_empty() {
            ingredient.notes = NOTE_CAS_NOT_FOUND.to_string();
            ingredient.compliant = false;
            continue;
        }

        match lookup.find_by_cas(&cas) {
            Ok(Some(master)) => {
                ingredient.chemical_name = master.chemical_name;
                ingredient.aics_listed = master.aics_listed;
                ingredient.sir = master.sir;
                ingredient.susmp = master.susmp;
                ingredient.nzoic = master.nzoic;
                ingredient.compliant = true;
            }
            Ok(None) => {
                ingredient.notes = NOTE_CAS_NOT_FOUND.to_string();
                ingredient.compliant = false;
            }
            Err(err) => {
                warn!("master lookup failed for CAS {cas}: {err}");
                ingredient.notes = NOTE_LOOKUP_ERROR.to_string();
                ingredient.compliant = false;
            }
        }
    }

    ingredients
}
