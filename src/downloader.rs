use chrono::Utc;
use printpdf::{BuiltinFont, Mm, PdfDocumentReference, PdfLayerReference};
use std::error::Error;

use crate::formula::Formula;
use crate::review::Review;

/// Render a review to a paginated PDF report.
///
/// The report carries the formula metadata, the review notes and one
/// table row per ingredient with the compliance reference fields. Long
/// notes wrap; the table continues onto fresh pages (with the header
/// repeated) when the cursor reaches the bottom margin.
///
/// # Arguments
/// * `formula` - The reviewed submission
/// * `review` - The completed review to render
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - PDF file content as bytes or an error
pub fn review_to_pdf(formula: &Formula, review: &Review) -> Result<Vec<u8>, Box<dyn Error>> {
    let (doc, first_page, first_layer) =
        printpdf::PdfDocument::new("Formula Review Report", Mm(210.0), Mm(297.0), "Layer 1");
    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;

    let table_header = |layer: &PdfLayerReference, y| {
        let headers = [
            (12.0, "CAS"),
            (36.0, "INCI Name"),
            (72.0, "Conc."),
            (86.0, "Chemical Name"),
            (122.0, "AICS"),
            (138.0, "SIR"),
            (154.0, "SUSMP"),
            (172.0, "NZOIC"),
            (188.0, "Compl."),
        ];
        for (x, text) in headers {
            layer.use_text(text, 8.0, Mm(x), Mm(y), &bold);
        }
    };

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut y = 280.0;

    layer.use_text("Cosmetic Formula Review Report", 16.0, Mm(15.0), Mm(y), &bold);
    y -= 10.0;

    let product_name = non_empty_or(&review.product_name, "Unknown Product");
    let formula_number = non_empty_or(&review.formula_number, &formula.id);
    let completed = review
        .review_completed_at
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());

    let metadata = [
        format!("Product: {product_name}"),
        format!("Formula number: {formula_number}"),
        format!("Submission: {} ({})", formula.original_filename, formula.id),
        format!("Submitted: {}", formula.created_at.format("%Y-%m-%d")),
        format!("Review completed: {completed}"),
    ];
    for line in &metadata {
        layer.use_text(line.as_str(), 10.0, Mm(15.0), Mm(y), &font);
        y -= 6.0;
    }

    y -= 4.0;
    layer.use_text("Review Notes", 12.0, Mm(15.0), Mm(y), &bold);
    y -= 6.0;
    for line in wrap_text(&review.review_notes, 95) {
        if y < 20.0 {
            layer = new_page(&doc);
            y = 280.0;
        }
        layer.use_text(line.as_str(), 10.0, Mm(15.0), Mm(y), &font);
        y -= 5.0;
    }

    y -= 6.0;
    layer.use_text("Ingredients", 12.0, Mm(15.0), Mm(y), &bold);
    y -= 7.0;

    if y < 30.0 {
        layer = new_page(&doc);
        y = 280.0;
    }
    table_header(&layer, y);
    y -= 6.0;

    for ingredient in &review.ingredients {
        let note_lines = if ingredient.notes.trim().is_empty() {
            Vec::new()
        } else {
            wrap_text(&format!("Note: {}", ingredient.notes), 90)
        };
        let mut needed = 5.0;
        for _ in &note_lines {
            needed += 4.0;
        }

        if y - needed < 15.0 {
            layer = new_page(&doc);
            y = 280.0;
            table_header(&layer, y);
            y -= 6.0;
        }

        let compliant = if ingredient.compliant { "Yes" } else { "No" };
        let cells = [
            (12.0, truncate(&ingredient.cas_number, 12)),
            (36.0, truncate(&ingredient.inci_name, 17)),
            (72.0, truncate(&ingredient.concentration, 6)),
            (86.0, truncate(&ingredient.chemical_name, 17)),
            (122.0, truncate(&ingredient.aics_listed, 7)),
            (138.0, truncate(&ingredient.sir, 7)),
            (154.0, truncate(&ingredient.susmp, 8)),
            (172.0, truncate(&ingredient.nzoic, 7)),
            (188.0, compliant.to_string()),
        ];
        for (x, text) in cells {
            layer.use_text(text, 8.0, Mm(x), Mm(y), &font);
        }
        y -= 5.0;

        for line in note_lines {
            layer.use_text(line.as_str(), 8.0, Mm(36.0), Mm(y), &font);
            y -= 4.0;
        }
    }

    Ok(doc.save_to_bytes()?)
}

fn new_page(doc: &PdfDocumentReference) -> PdfLayerReference {
    let (page, layer) = doc.add_page(Mm(210.0), Mm(297.0), "Layer 1");
    doc.get_page(page).get_layer(layer)
}

/// Filename for a generated report: the formula number when one is
/// set, otherwise the formula id, plus the current date.
pub fn report_filename(formula: &Formula, review: &Review) -> String {
    let source = if review.formula_number.trim().is_empty() {
        formula.id.as_str()
    } else {
        review.formula_number.trim()
    };

    let stem: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    format!("{}-{}.pdf", stem, Utc::now().format("%Y-%m-%d"))
}

/// Export a review's ingredient table to CSV.
///
/// Values containing commas, quotes or newlines are quoted and
/// escaped, so the output loads cleanly in a spreadsheet.
///
/// # Arguments
/// * `review` - The review whose ingredient table to export
///
/// # Returns
/// * `String` - CSV content
pub fn to_csv(review: &Review) -> String {
    let mut csv_content = String::from(
        "CAS Number,INCI Name,Concentration,Chemical Name,AICS Listed,SIR,SUSMP,NZOIC,Compliant,Notes\n",
    );

    for ingredient in &review.ingredients {
        let compliant = if ingredient.compliant { "Yes" } else { "No" };
        let fields = [
            ingredient.cas_number.as_str(),
            ingredient.inci_name.as_str(),
            ingredient.concentration.as_str(),
            ingredient.chemical_name.as_str(),
            ingredient.aics_listed.as_str(),
            ingredient.sir.as_str(),
            ingredient.susmp.as_str(),
            ingredient.nzoic.as_str(),
            compliant,
            ingredient.notes.as_str(),
        ];

        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                csv_content.push(',');
            }
            if field.contains(',') || field.contains('"') || field.contains('\n') {
                let escaped = field.replace('"', "\"\"");
                csv_content.push_str(&format!("\"{}\"", escaped));
            } else {
                csv_content.push_str(field);
            }
        }
        csv_content.push('\n');
    }

    csv_content
}

/// Build the canonical upload template workbook: product name and
/// formula number header rows, then the ingredient column headers.
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
pub fn formula_template() -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::Workbook;

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    worksheet.write_string(0, 0, "Product Name")?;
    worksheet.write_string(1, 0, "Formula Number")?;
    worksheet.write_string(2, 0, "CAS Number")?;
    worksheet.write_string(2, 1, "INCI Name")?;
    worksheet.write_string(2, 2, "Concentration (%)")?;

    Ok(workbook.save_to_buffer()?)
}

/// Break text into lines of at most `max_chars` characters, splitting
/// on whitespace. Paragraph breaks in the input are kept.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
            } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
                current.push(' ');
                current.push_str(word);
            } else {
                lines.push(current);
                current = word.to_string();
            }
        }
        lines.push(current);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() { fallback } else { value }
}
