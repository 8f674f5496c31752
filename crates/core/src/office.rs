//! Word and Excel extraction.
//!
//! A Word document collapses into one unit: body paragraphs first, then table
//! rows. A workbook yields one unit per non-empty sheet, numbered by the
//! sheet's 1-based position.

use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::TextUnit;
use crate::traits::{DocumentExtractor, UnitStream};
use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use quick_xml::events::Event;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";
const CELL_SEPARATOR: &str = " | ";

#[derive(Debug, Default, Clone, Copy)]
pub struct FlowTextExtractor;

impl DocumentExtractor for FlowTextExtractor {
    fn extract(&self, path: &Path) -> Result<UnitStream, IngestError> {
        let file = File::open(path)?;
        let mut archive =
            ZipArchive::new(file).map_err(|error| IngestError::FlowText(error.to_string()))?;

        let mut xml = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .map_err(|error| IngestError::FlowText(format!("{DOCUMENT_PART}: {error}")))?
            .read_to_string(&mut xml)?;

        let text = normalize_whitespace(&docx_text(&xml)?);
        let units = if text.is_empty() {
            Vec::new()
        } else {
            vec![Ok(TextUnit { unit_id: 1, text })]
        };

        Ok(Box::new(units.into_iter()))
    }
}

/// Linearize WordprocessingML: paragraphs outside tables, then one line per
/// table row with cell texts joined by a space.
pub(crate) fn docx_text(xml: &str) -> Result<String, IngestError> {
    let xml_error = |error: quick_xml::Error| IngestError::FlowText(error.to_string());

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut rows = Vec::new();
    let mut row_cells: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(element) => match element.name().as_ref() {
                b"w:tbl" => table_depth += 1,
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(element) => {
                if matches!(element.name().as_ref(), b"w:tab" | b"w:br" | b"w:cr") {
                    current.push(' ');
                }
            }
            Event::Text(text) if in_text => {
                current.push_str(&text.unescape().map_err(xml_error)?);
            }
            Event::End(element) => match element.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" if table_depth == 0 => {
                    let paragraph = current.trim();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph.to_string());
                    }
                    current.clear();
                }
                b"w:p" => current.push(' '),
                b"w:tc" => {
                    row_cells.push(current.trim().to_string());
                    current.clear();
                }
                b"w:tr" => {
                    let row = row_cells.join(" ");
                    if !row.trim().is_empty() {
                        rows.push(row.trim().to_string());
                    }
                    row_cells.clear();
                }
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    paragraphs.extend(rows);
    Ok(paragraphs.join("\n"))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SheetExtractor;

impl DocumentExtractor for SheetExtractor {
    fn extract(&self, path: &Path) -> Result<UnitStream, IngestError> {
        let workbook =
            open_workbook_auto(path).map_err(|error| IngestError::Spreadsheet(error.to_string()))?;
        let names = workbook.sheet_names();

        Ok(Box::new(SheetUnits {
            workbook,
            sheets: names.into_iter().enumerate().collect::<Vec<_>>().into_iter(),
        }))
    }
}

struct SheetUnits {
    workbook: Sheets<BufReader<File>>,
    sheets: std::vec::IntoIter<(usize, String)>,
}

impl Iterator for SheetUnits {
    type Item = Result<TextUnit, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, name) in self.sheets.by_ref() {
            let range = match self.workbook.worksheet_range(&name) {
                Ok(range) => range,
                Err(error) => {
                    return Some(Err(IngestError::Spreadsheet(format!("sheet {name}: {error}"))))
                }
            };

            let text = normalize_whitespace(&sheet_text(&range));
            if !text.is_empty() {
                return Some(Ok(TextUnit {
                    unit_id: (index + 1) as u32,
                    text,
                }));
            }
        }
        None
    }
}

/// Non-empty cells joined per row, non-empty rows joined by newline.
pub(crate) fn sheet_text(range: &Range<Data>) -> String {
    range
        .rows()
        .filter_map(|row| {
            let cells = row
                .iter()
                .filter(|cell| !matches!(cell, Data::Empty))
                .map(|cell| cell.to_string().trim().to_string())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>();

            if cells.is_empty() {
                None
            } else {
                Some(cells.join(CELL_SEPARATOR))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{write_docx, write_xlsx};
    use tempfile::tempdir;

    #[test]
    fn docx_paragraphs_come_before_table_rows() -> Result<(), IngestError> {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Intro</w:t></w:r><w:r><w:t xml:space="preserve"> text</w:t></w:r></w:p>
    <w:tbl>
      <w:tr>
        <w:tc><w:p><w:r><w:t>Load</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>12 kN</w:t></w:r></w:p></w:tc>
      </w:tr>
      <w:tr><w:tc><w:p></w:p></w:tc></w:tr>
    </w:tbl>
    <w:p><w:r><w:t>Beams &amp; columns</w:t><w:tab/><w:t>end</w:t></w:r></w:p>
    <w:p></w:p>
  </w:body>
</w:document>"#;

        let text = docx_text(xml)?;
        assert_eq!(text, "Intro text\nBeams & columns end\nLoad 12 kN");
        Ok(())
    }

    #[test]
    fn docx_file_is_a_single_unit() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.docx");
        write_docx(&path, &["First   paragraph", "Second paragraph"])?;

        let units = FlowTextExtractor.extract(&path)?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            units,
            vec![TextUnit {
                unit_id: 1,
                text: "First paragraph Second paragraph".to_string(),
            }]
        );
        Ok(())
    }

    #[test]
    fn legacy_or_corrupt_word_files_fail_per_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("old.doc");
        std::fs::write(&path, b"\xd0\xcf\x11\xe0 not a zip")?;

        assert!(matches!(
            FlowTextExtractor.extract(&path),
            Err(IngestError::FlowText(_))
        ));
        Ok(())
    }

    #[test]
    fn sheet_rows_skip_empty_cells_and_rows() {
        let mut range: Range<Data> = Range::new((0, 0), (2, 2));
        range.set_value((0, 0), Data::String("Course".to_string()));
        range.set_value((0, 2), Data::String("Credits".to_string()));
        range.set_value((2, 0), Data::String(" Statics ".to_string()));
        range.set_value((2, 1), Data::String("   ".to_string()));
        range.set_value((2, 2), Data::Int(4));

        assert_eq!(sheet_text(&range), "Course | Credits\nStatics | 4");
    }

    #[test]
    fn empty_sheets_are_skipped_but_keep_their_position() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("grades.xlsx");
        write_xlsx(
            &path,
            &[
                ("Fall", vec![vec!["Course", "Credits"], vec!["Statics", "4"]]),
                ("Blank", vec![]),
                ("Spring", vec![vec!["Dynamics", "3"]]),
            ],
        )?;

        let units = SheetExtractor.extract(&path)?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            units,
            vec![
                TextUnit {
                    unit_id: 1,
                    text: "Course | Credits Statics | 4".to_string(),
                },
                TextUnit {
                    unit_id: 3,
                    text: "Dynamics | 3".to_string(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn unreadable_workbook_is_a_spreadsheet_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("grades.xlsx");
        std::fs::write(&path, b"not a workbook")?;

        assert!(matches!(
            SheetExtractor.extract(&path),
            Err(IngestError::Spreadsheet(_))
        ));
        Ok(())
    }
}
