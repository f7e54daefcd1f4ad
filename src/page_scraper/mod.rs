use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::normalizer::ExtractedFields;

/// One lookup rule: any of `labels` found in a table cell, value taken
/// `cell_offset` cells to the right in the same row.
#[derive(Debug, Clone, Copy)]
pub struct LabelRule {
    pub labels: &'static [&'static str],
    pub cell_offset: usize,
}

/// Rules are tried in order; the first non-empty value wins.
pub const IDENTIFIER_RULES: &[LabelRule] = &[
    LabelRule {
        labels: &["CPF/CNPJ", "CNPJ/CPF"],
        cell_offset: 1,
    },
    LabelRule {
        labels: &["CPF", "CNPJ", "Documento"],
        cell_offset: 1,
    },
];

pub const OWNER_RULES: &[LabelRule] = &[LabelRule {
    labels: &["Proprietário", "Responsável", "Titular"],
    cell_offset: 1,
}];

pub const ADDRESS_RULES: &[LabelRule] = &[LabelRule {
    labels: &["Logradouro", "Endereço"],
    cell_offset: 1,
}];

/// Lowercase with accents removed, so "PROPRIETÁRIO" matches "proprietario".
fn fold(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn enclosing_row<'a>(cell: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    cell.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "tr")
}

fn row_cells<'a>(row: &ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

/// Rendered result page of the CND search
pub struct ResultPage {
    document: Html,
    cells: Selector,
}

impl ResultPage {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
            cells: Selector::parse("td, th").unwrap(),
        }
    }

    /// Innermost cells only; a cell wrapping a nested table would otherwise
    /// match every label inside it.
    fn leaf_cells(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.document.select(&self.cells).filter(|cell| {
            !cell
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .any(|el| matches!(el.value().name(), "td" | "th"))
        })
    }

    fn value_for_label(&self, label: &str, offset: usize) -> Option<String> {
        let wanted = fold(label);

        for cell in self.leaf_cells() {
            if !fold(&cell_text(&cell)).contains(&wanted) {
                continue;
            }
            let Some(row) = enclosing_row(&cell) else {
                continue;
            };
            let cells = row_cells(&row);
            let Some(index) = cells.iter().position(|c| c.id() == cell.id()) else {
                continue;
            };
            if let Some(target) = cells.get(index + offset) {
                let value = cell_text(target);
                if !value.is_empty() {
                    debug!("Label {:?} matched with value {:?}", label, value);
                    return Some(value);
                }
            }
        }

        None
    }

    /// First non-empty value across `rules`, or an empty string.
    pub fn lookup(&self, rules: &[LabelRule]) -> String {
        rules
            .iter()
            .flat_map(|rule| rule.labels.iter().map(move |label| (label, rule.cell_offset)))
            .find_map(|(label, offset)| self.value_for_label(label, offset))
            .unwrap_or_default()
    }

    /// Raw (not yet normalized) fields found on the page
    pub fn extract_fields(&self) -> ExtractedFields {
        ExtractedFields {
            identifier: self.lookup(IDENTIFIER_RULES),
            owner_display_name: self.lookup(OWNER_RULES),
            property_address: self.lookup(ADDRESS_RULES),
            internal_property_id: String::new(),
            extraction_failed: false,
        }
    }
}

pub fn scrape_page(html: &str) -> ExtractedFields {
    ResultPage::parse(html).extract_fields()
}
