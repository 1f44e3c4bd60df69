use std::collections::HashSet;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use log::{debug, warn};

use crate::error::PortalError;
use crate::ingredient::{is_valid_cas, Ingredient, MasterIngredient};

/// User-facing message for a workbook that cannot be opened or does not
/// contain a readable sheet.
pub const ERR_PARSE: &str = "Failed to parse Excel file. Please ensure it follows the expected format.";

/// User-facing message for an upload whose bytes could not be read.
pub const ERR_READ: &str = "Failed to read file.";

const PRODUCT_NAME_FALLBACK: &str = "Unknown Product";
const FORMULA_NUMBER_FALLBACK: &str = "Unknown Formula";

/// Result of parsing a customer's formula workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    pub product_name: String,
    pub formula_number: String,
    pub ingredients: Vec<Ingredient>,
}

/// Parse an uploaded formula workbook.
///
/// The expected layout is the one produced by the downloadable
/// template: the product name in the first row, the formula number in
/// the second, a column-header row, then one ingredient per row with
/// CAS number, INCI name and concentration in the first three columns.
/// Rows without an INCI name are skipped silently; missing header cells
/// fall back to placeholder names so a sloppy sheet still parses.
///
/// # Arguments
/// * `bytes` - Raw XLSX file content
///
/// # Returns
/// * `Result<ParsedFormula, PortalError>` - Parsed header fields and
///   ingredient rows, or a parse error with a user-facing message
pub fn parse_formula_workbook(bytes: &[u8]) -> Result<ParsedFormula, PortalError> {
    let rows = read_first_sheet(bytes)?;

    let product_name =
        first_non_empty(rows.first()).unwrap_or_else(|| PRODUCT_NAME_FALLBACK.to_string());
    let formula_number =
        first_non_empty(rows.get(1)).unwrap_or_else(|| FORMULA_NUMBER_FALLBACK.to_string());

    let mut ingredients = Vec::new();
    for row in rows.iter().skip(3) {
        if row.len() < 3 {
            continue;
        }

        let inci_name = row[1].trim();
        if inci_name.is_empty() {
            continue;
        }

        let cas_number = row[0].trim();
        if !cas_number.is_empty() && !is_valid_cas(cas_number) {
            debug!("CAS column value {cas_number:?} does not look like a CAS number");
        }

        ingredients.push(Ingredient::from_parsed(cas_number, inci_name, row[2].trim()));
    }

    Ok(ParsedFormula {
        product_name,
        formula_number,
        ingredients,
    })
}

/// Parse an admin bulk upload of the master compliance table.
///
/// The first row is a header and is skipped. Every following row needs
/// at least six columns: CAS number, chemical name, AICS listing,
/// specific information requirement, SUSMP and NZOIC classifications.
/// Duplicate CAS numbers keep the first occurrence; later duplicates
/// are logged and dropped.
///
/// # Arguments
/// * `bytes` - Raw XLSX file content
///
/// # Returns
/// * `Result<Vec<MasterIngredient>, PortalError>` - Deduplicated
///   reference records in sheet order, or a parse error
pub fn parse_master_workbook(bytes: &[u8]) -> Result<Vec<MasterIngredient>, PortalError> {
    let rows = read_first_sheet(bytes)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();

    for (index, row) in rows.iter().enumerate().skip(1) {
        if row.len() < 6 {
            continue;
        }

        let cas_number = row[0].trim().to_string();
        if cas_number.is_empty() {
            continue;
        }

        if !seen.insert(cas_number.clone()) {
            warn!(
                "master upload row {}: duplicate CAS {cas_number}, keeping first occurrence",
                index + 1
            );
            continue;
        }

        records.push(MasterIngredient {
            cas_number,
            chemical_name: row[1].trim().to_string(),
            aics_listed: row[2].trim().to_string(),
            sir: row[3].trim().to_string(),
            susmp: row[4].trim().to_string(),
            nzoic: row[5].trim().to_string(),
        });
    }

    Ok(records)
}

/// Open the workbook and flatten its first sheet into trimmed strings.
fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, PortalError> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|_| PortalError::Parse(ERR_PARSE.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| PortalError::Parse(ERR_PARSE.to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|_| PortalError::Parse(ERR_PARSE.to_string()))?;

    // The used range is trimmed to the first non-empty cell; pad it
    // back out so row and column positions stay absolute.
    let (start_row, start_col) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<String>> = vec![Vec::new(); start_row];
    rows.extend(range.rows().map(|row| {
        let mut cells = vec![String::new(); start_col];
        cells.extend(row.iter().map(cell_text));
        // The range pads every row to the full sheet width; drop the
        // trailing padding so column-count checks see the real row.
        while cells.last().is_some_and(|cell| cell.is_empty()) {
            cells.pop();
        }
        cells
    }));

    Ok(rows)
}

/// Render a cell to the text the parser works with. Numbers keep their
/// shortest form so a CAS column typed as numeric still round-trips.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        // Error cells and anything else read as empty
        _ => String::new(),
    }
}

fn first_non_empty(row: Option<&Vec<String>>) -> Option<String> {
    row.and_then(|cells| {
        cells
            .iter()
            .map(|cell| cell.trim())
            .find(|cell| !cell.is_empty())
            .map(|cell| cell.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    /// Build an XLSX in memory: one sheet, rows of strings.
    fn workbook_bytes(rows: &[Vec<&str>]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if !cell.is_empty() {
                    worksheet.write_string(r as u32, c as u16, *cell).unwrap();
                }
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    fn formula_sheet() -> Vec<Vec<&'static str>> {
        vec![
            vec!["Hydrating Day Cream"],
            vec!["HDC-042"],
            vec!["CAS Number", "INCI Name", "Concentration (%)"],
            vec!["7732-18-5", "Aqua", "70"],
            vec!["56-81-5", "Glycerin", "5"],
            vec!["", "Parfum", "0.5"],
        ]
    }

    #[test]
    fn parses_header_rows_and_ingredients() {
        let bytes = workbook_bytes(&formula_sheet());
        let parsed = parse_formula_workbook(&bytes).unwrap();

        assert_eq!(parsed.product_name, "Hydrating Day Cream");
        assert_eq!(parsed.formula_number, "HDC-042");
        assert_eq!(parsed.ingredients.len(), 3);
        assert_eq!(parsed.ingredients[0].cas_number, "7732-18-5");
        assert_eq!(parsed.ingredients[0].inci_name, "Aqua");
        assert_eq!(parsed.ingredients[0].concentration, "70");
        // Rows parse before auto-complete, so they start compliant.
        assert!(parsed.ingredients.iter().all(|i| i.compliant));
    }

    #[test]
    fn rows_without_inci_name_are_skipped() {
        let mut rows = formula_sheet();
        rows.push(vec!["123-45-6", "", "10"]);
        rows.push(vec!["", "", ""]);

        let bytes = workbook_bytes(&rows);
        let parsed = parse_formula_workbook(&bytes).unwrap();
        assert_eq!(parsed.ingredients.len(), 3);
    }

    #[test]
    fn header_fallbacks_apply_to_sparse_sheets() {
        let bytes = workbook_bytes(&[
            vec![""],
            vec![""],
            vec!["CAS Number", "INCI Name", "Concentration (%)"],
            vec!["7732-18-5", "Aqua", "70"],
        ]);

        let parsed = parse_formula_workbook(&bytes).unwrap();
        assert_eq!(parsed.product_name, "Unknown Product");
        assert_eq!(parsed.formula_number, "Unknown Formula");
        assert_eq!(parsed.ingredients.len(), 1);
    }

    #[test]
    fn corrupt_bytes_surface_the_parse_message() {
        let err = parse_formula_workbook(b"definitely not a zip archive").unwrap_err();
        assert_eq!(err.to_string(), ERR_PARSE);
    }

    #[test]
    fn master_upload_skips_header_and_short_rows() {
        let bytes = workbook_bytes(&[
            vec!["CAS", "Chemical Name", "AICS", "SIR", "SUSMP", "NZOIC"],
            vec!["7732-18-5", "Water", "Yes", "", "", "Listed"],
            vec!["too", "short"],
            vec!["56-81-5", "Glycerol", "Yes", "SIR-2", "Unscheduled", "Listed"],
        ]);

        let records = parse_master_workbook(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cas_number, "7732-18-5");
        assert_eq!(records[0].chemical_name, "Water");
        assert_eq!(records[1].sir, "SIR-2");
    }

    #[test]
    fn master_upload_keeps_first_of_duplicate_cas() {
        // 250 data rows, of which 3 duplicate an earlier CAS number.
        let mut rows: Vec<Vec<String>> = vec![vec![
            "CAS".into(),
            "Chemical Name".into(),
            "AICS".into(),
            "SIR".into(),
            "SUSMP".into(),
            "NZOIC".into(),
        ]];
        for i in 0..247 {
            rows.push(vec![
                format!("{}-00-0", 1000 + i),
                format!("chemical {i}"),
                "Yes".into(),
                "SIR-1".into(),
                "Unscheduled".into(),
                "Listed".into(),
            ]);
        }
        for i in 0..3 {
            rows.push(vec![
                format!("{}-00-0", 1000 + i),
                format!("duplicate {i}"),
                "No".into(),
                "SIR-1".into(),
                "Unscheduled".into(),
                "Listed".into(),
            ]);
        }
        assert_eq!(rows.len(), 251);

        let borrowed: Vec<Vec<&str>> = rows
            .iter()
            .map(|row| row.iter().map(String::as_str).collect())
            .collect();
        let bytes = workbook_bytes(&borrowed);

        let records = parse_master_workbook(&bytes).unwrap();
        assert_eq!(records.len(), 247);
        // First occurrence wins.
        assert_eq!(records[0].chemical_name, "chemical 0");
    }
}
