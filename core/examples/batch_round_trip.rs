//! Batch round-trip example
//!
//! Writes a request batch with a changeset, reads it back and prints the
//! operations with their resolved dependencies.
//!
//! Run with: cargo run --example batch_round_trip

use http::Method;
use odata_batch::{BatchConfig, BatchReader, BatchReaderState, BatchWriter, MessageKind, PayloadUriOption};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("OData Batch Round Trip");
    println!("======================\n");

    let config = BatchConfig::default();
    let mut writer = BatchWriter::json(Vec::new(), MessageKind::Request, config.clone());
    let content_type = writer.content_type();

    writer.write_start_batch()?;
    writer
        .create_operation_request_message(
            Method::GET,
            "Customers('ALFKI')",
            Some("0"),
            PayloadUriOption::RelativeUri,
            &[],
        )?
        .finish()?;

    writer.write_start_changeset_with_id("cs1")?;
    let mut op = writer.create_operation_request_message(
        Method::POST,
        "Customers",
        Some("1"),
        PayloadUriOption::RelativeUri,
        &[],
    )?;
    op.set_header("Content-Type", "application/json")?;
    op.write_body(br#"{"CustomerID":"NEW","CompanyName":"New Co"}"#)?;
    op.finish()?;

    let mut op = writer.create_operation_request_message(
        Method::PATCH,
        "$1",
        Some("2"),
        PayloadUriOption::RelativeUri,
        &["1".to_string()],
    )?;
    op.set_header("Content-Type", "application/json")?;
    op.write_body(br#"{"CompanyName":"Renamed Co"}"#)?;
    op.finish()?;
    writer.write_end_changeset()?;

    writer
        .create_operation_request_message(
            Method::GET,
            "Products",
            Some("3"),
            PayloadUriOption::RelativeUri,
            &["cs1".to_string()],
        )?
        .finish()?;
    writer.write_end_batch()?;

    let payload = writer.into_inner()?;
    println!("Content-Type: {}", content_type);
    println!("{}\n", String::from_utf8_lossy(&payload));

    let mut reader = BatchReader::for_requests(&payload[..], &content_type, config)?;
    while reader.read()? {
        match reader.state() {
            BatchReaderState::ChangesetStart => {
                println!("changeset {}", reader.current_group_id().unwrap_or("?"))
            }
            BatchReaderState::ChangesetEnd => println!("end of changeset"),
            BatchReaderState::Operation => {
                let mut op = reader.create_operation_request_message()?;
                let body = op.body_stream()?.read_to_bytes()?;
                println!(
                    "  {} {} id={} dependsOn={:?} body={} bytes",
                    op.method(),
                    op.url(),
                    op.content_id().unwrap_or("-"),
                    &*op.depends_on_ids(),
                    body.len()
                );
            }
            _ => {}
        }
    }

    Ok(())
}
