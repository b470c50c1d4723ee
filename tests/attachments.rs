//! Uploaded attachments flow through extraction into the model request.

mod common;

use chathome::provider::{CallPurpose, StreamScript};
use chathome_core::context::{ContentPart, TurnContent};
use chathome_core::models::Tier;
use serde_json::{json, Value};

use common::{spawn_app, user_parts, TestApp};

/// Minimal valid PDF containing the text "quarterly revenue grew".
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 54 >> stream\nBT /F1 12 Tf 100 700 Td (quarterly revenue grew) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx (ZIP) whose body is one paragraph of `phrase`.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// 1x1 transparent PNG.
const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

async fn upload_key(app: &TestApp, name: &str, mime: &str, bytes: Vec<u8>) -> String {
    let resp = app.upload(&app.pat, name, mime, bytes).await;
    assert_eq!(resp.status(), 200, "upload of {} failed", name);
    let body: Value = resp.json().await.unwrap();
    body["key"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn pdf_and_word_text_are_wrapped_in_markers() {
    let app = spawn_app().await;
    let pdf = upload_key(&app, "report.pdf", "application/pdf", minimal_pdf_with_phrase()).await;
    let docx = upload_key(
        &app,
        "notes.docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        minimal_docx_with_text("bring the projector"),
    )
    .await;

    app.provider.push_stream(StreamScript::chunks(["Summary."]));
    let resp = app
        .send(
            &app.pat,
            "application/json",
            json!({ "content": "summarise these", "attachments": [pdf, docx] }),
        )
        .await;
    assert_eq!(resp.status(), 200);

    let parts = user_parts(&app.provider);
    assert_eq!(parts.len(), 3);
    assert!(parts[1].starts_with("[PDF Document: report.pdf]"));
    assert!(parts[1].contains("quarterly revenue grew"));
    assert!(parts[1].ends_with("[End of PDF]"));
    assert!(parts[2].starts_with("[Word Document: notes.docx]"));
    assert!(parts[2].contains("bring the projector"));
    assert!(parts[2].ends_with("[End of Document]"));
}

#[tokio::test]
async fn broken_pdf_still_sends_with_failure_marker() {
    let app = spawn_app().await;
    let key = upload_key(&app, "scan.pdf", "application/pdf", b"not a pdf".to_vec()).await;

    app.provider.push_stream(StreamScript::chunks(["I couldn't read it."]));
    let resp = app
        .send(
            &app.pat,
            "application/json",
            json!({ "content": "what does it say?", "attachments": [key] }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let parts = user_parts(&app.provider);
    assert!(parts[1].starts_with("[PDF Document: scan.pdf]"));
    assert!(parts[1].contains("(Failed to extract text from PDF)"));
}

#[tokio::test]
async fn image_downgrades_thinking_to_vision_tier() {
    let app = spawn_app().await;
    let key = upload_key(&app, "cat.png", "image/png", TINY_PNG.to_vec()).await;

    app.provider.push_stream(StreamScript::chunks(["A very small image."]));
    let resp = app
        .send(
            &app.pat,
            "application/json",
            json!({ "content": "describe", "model": "thinking", "attachments": [key] }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["assistantMessage"]["model"], "fast");

    let call = app.provider.calls_for(CallPurpose::Chat).pop().unwrap();
    assert_eq!(call.tier, Tier::Fast);
    let TurnContent::Parts(parts) = &call.messages.last().unwrap().content else {
        panic!("image turn should be multipart");
    };
    let ContentPart::ImageUrl { image_url } = &parts[1] else {
        panic!("second part should be the image");
    };
    assert!(image_url.url.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn deleted_blob_becomes_unreadable_marker() {
    let app = spawn_app().await;
    let key = upload_key(&app, "todo.txt", "text/plain", b"milk".to_vec()).await;
    std::fs::remove_dir_all(app.blob_root.join(&app.pat_id)).unwrap();

    app.provider.push_stream(StreamScript::chunks(["ok"]));
    let resp = app
        .send(
            &app.pat,
            "application/json",
            json!({ "content": "check my list", "attachments": [key] }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    // Without metadata the label falls back to the key's last segment.
    let parts = user_parts(&app.provider);
    assert!(parts[1].starts_with("[File: "));
    assert!(parts[1].ends_with("-todo.txt]\n(File could not be read)\n[End of file]"));
}
