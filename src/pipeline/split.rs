//! Page splitting: one multi-page PDF → one single-page PDF per page.
//!
//! Each page unit is produced by cloning the parsed document, deleting every
//! other page, and pruning unreachable objects, so the engine receives a
//! self-contained PDF with the page's own fonts and images. lopdf keeps
//! objects in a `BTreeMap`, which makes the serialised output a pure function
//! of the input bytes: splitting the same document twice yields identical
//! page units.
//!
//! The work is CPU-bound and runs inside `spawn_blocking`.

use crate::error::PipelineError;
use crate::output::PageUnit;
use lopdf::Document as PdfDocument;
use tracing::{debug, info};

/// Split `bytes` into page units numbered 1..=N.
pub async fn split_pages(bytes: Vec<u8>, name: &str) -> Result<Vec<PageUnit>, PipelineError> {
    let name_owned = name.to_string();
    tokio::task::spawn_blocking(move || split_pages_blocking(&bytes, &name_owned))
        .await
        .map_err(|e| PipelineError::Internal(format!("Split task panicked: {}", e)))?
}

/// Blocking implementation of page splitting.
pub fn split_pages_blocking(bytes: &[u8], name: &str) -> Result<Vec<PageUnit>, PipelineError> {
    let document = PdfDocument::load_mem(bytes).map_err(|e| PipelineError::Split {
        name: name.to_string(),
        detail: e.to_string(),
    })?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    info!("PDF loaded: {} pages", page_numbers.len());

    let mut units = Vec::with_capacity(page_numbers.len());
    for (idx, &keep) in page_numbers.iter().enumerate() {
        let content = extract_single_page(&document, &page_numbers, keep).map_err(|detail| {
            PipelineError::Split {
                name: name.to_string(),
                detail: format!("page {}: {}", idx + 1, detail),
            }
        })?;
        debug!("Split page {} → {} bytes", idx + 1, content.len());
        units.push(PageUnit {
            page_number: idx + 1,
            content,
        });
    }

    Ok(units)
}

fn extract_single_page(
    document: &PdfDocument,
    all_pages: &[u32],
    keep: u32,
) -> Result<Vec<u8>, String> {
    let mut single = document.clone();
    let others: Vec<u32> = all_pages.iter().copied().filter(|&p| p != keep).collect();
    single.delete_pages(&others);
    single.prune_objects();

    let mut buf = Vec::new();
    single.save_to(&mut buf).map_err(|e| e.to_string())?;
    Ok(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};

    /// Build an N-page PDF whose page K draws the text "Page K".
    pub(crate) fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = PdfDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for n in 1..=pages {
            let ops = format!("BT /F1 24 Tf 72 720 Td (Page {n}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("save sample pdf");
        buf
    }

    #[test]
    fn splits_into_numbered_single_pages() {
        let units = split_pages_blocking(&sample_pdf(3), "three.pdf").unwrap();
        assert_eq!(units.len(), 3);
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.page_number, i + 1);
            let single = PdfDocument::load_mem(&unit.content).unwrap();
            assert_eq!(single.get_pages().len(), 1, "page {} is single", i + 1);
        }
    }

    #[test]
    fn each_unit_keeps_its_own_page() {
        let units = split_pages_blocking(&sample_pdf(2), "two.pdf").unwrap();
        let second = PdfDocument::load_mem(&units[1].content).unwrap();
        let (_, page_id) = second.get_pages().into_iter().next().unwrap();
        let text = second.get_page_content(page_id).unwrap();
        assert!(String::from_utf8_lossy(&text).contains("(Page 2)"));
    }

    #[test]
    fn splitting_is_repeatable() {
        let pdf = sample_pdf(4);
        let a = split_pages_blocking(&pdf, "four.pdf").unwrap();
        let b = split_pages_blocking(&pdf, "four.pdf").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn garbage_is_a_split_error() {
        let err = split_pages_blocking(b"%PDF-1.4 but not really", "bad.pdf").unwrap_err();
        assert!(matches!(err, PipelineError::Split { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn async_split_matches_blocking() {
        let pdf = sample_pdf(2);
        let units = split_pages(pdf.clone(), "two.pdf").await.unwrap();
        assert_eq!(units, split_pages_blocking(&pdf, "two.pdf").unwrap());
    }
}
