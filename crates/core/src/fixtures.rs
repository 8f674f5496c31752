//! Document builders for tests.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write a PDF with one page per entry; an empty entry gives a page without
/// a text layer.
pub fn write_pdf(path: &Path, pages: &[&str]) -> Result<(), Box<dyn Error>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let operations = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

/// Write a minimal .docx whose body holds the given paragraphs.
pub fn write_docx(path: &Path, paragraphs: &[&str]) -> Result<(), Box<dyn Error>> {
    let body = paragraphs
        .iter()
        .map(|text| format!("<w:p><w:r><w:t xml:space=\"preserve\">{text}</w:t></w:r></w:p>"))
        .collect::<String>();
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    );

    let mut zip = zip::ZipWriter::new(File::create(path)?);
    zip.start_file(
        "word/document.xml",
        zip::write::SimpleFileOptions::default(),
    )?;
    zip.write_all(xml.as_bytes())?;
    zip.finish()?;
    Ok(())
}

/// Write a minimal .xlsx with one worksheet per entry. Cells are inline
/// strings; a sheet with no rows is written empty.
pub fn write_xlsx(path: &Path, sheets: &[(&str, Vec<Vec<&str>>)]) -> Result<(), Box<dyn Error>> {
    const MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
    const DOC_RELS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    let mut entries = Vec::new();
    let mut sheet_list = String::new();
    let mut relationships = String::new();
    let mut overrides = String::new();

    for (index, (name, rows)) in sheets.iter().enumerate() {
        let n = index + 1;
        sheet_list.push_str(&format!("<sheet name=\"{name}\" sheetId=\"{n}\" r:id=\"rId{n}\"/>"));
        relationships.push_str(&format!(
            "<Relationship Id=\"rId{n}\" Type=\"{DOC_RELS}/worksheet\" Target=\"worksheets/sheet{n}.xml\"/>"
        ));
        overrides.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{n}.xml\" \
             ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
        ));

        let mut data = String::new();
        for (r, row) in rows.iter().enumerate() {
            data.push_str(&format!("<row r=\"{}\">", r + 1));
            for (c, cell) in row.iter().enumerate() {
                let column = char::from(b'A' + c as u8);
                data.push_str(&format!(
                    "<c r=\"{column}{}\" t=\"inlineStr\"><is><t>{cell}</t></is></c>",
                    r + 1
                ));
            }
            data.push_str("</row>");
        }
        entries.push((
            format!("xl/worksheets/sheet{n}.xml"),
            format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><worksheet xmlns=\"{MAIN}\"><sheetData>{data}</sheetData></worksheet>"),
        ));
    }

    entries.push((
        "[Content_Types].xml".to_string(),
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
             <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
             <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
             <Override PartName=\"/xl/workbook.xml\" \
             ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
             {overrides}</Types>"
        ),
    ));
    entries.push((
        "_rels/.rels".to_string(),
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Relationships xmlns=\"{RELS}\">\
             <Relationship Id=\"rId1\" Type=\"{DOC_RELS}/officeDocument\" Target=\"xl/workbook.xml\"/>\
             </Relationships>"
        ),
    ));
    entries.push((
        "xl/workbook.xml".to_string(),
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <workbook xmlns=\"{MAIN}\" xmlns:r=\"{DOC_RELS}\"><sheets>{sheet_list}</sheets></workbook>"
        ),
    ));
    entries.push((
        "xl/_rels/workbook.xml.rels".to_string(),
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Relationships xmlns=\"{RELS}\">{relationships}</Relationships>"
        ),
    ));

    let mut zip = zip::ZipWriter::new(File::create(path)?);
    for (name, xml) in entries {
        zip.start_file(name, zip::write::SimpleFileOptions::default())?;
        zip.write_all(xml.as_bytes())?;
    }
    zip.finish()?;
    Ok(())
}

/// `count` distinct words: `w0 w1 ...`.
pub fn numbered_words(count: usize) -> String {
    (0..count)
        .map(|i| format!("w{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}
