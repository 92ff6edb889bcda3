use http::Method;
use odata_batch::{
    AsyncBatchReader, AsyncBatchWriter, BatchConfig, BatchError, BatchReaderState, MessageKind,
    PayloadUriOption,
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .try_init()
        .ok();
}

#[tokio::test]
async fn test_async_round_trip() {
    init_tracing();

    let mut writer = AsyncBatchWriter::mime(Vec::new(), MessageKind::Request, BatchConfig::default());
    let content_type = writer.content_type();
    writer.write_start_batch().await.unwrap();
    let group_id = writer.write_start_changeset().await.unwrap();
    let mut op = writer
        .create_operation_request_message(
            Method::POST,
            "Customers",
            Some("1"),
            PayloadUriOption::RelativeUri,
            &[],
        )
        .await
        .unwrap();
    op.set_header("Content-Type", "application/json").unwrap();
    op.write_body(br#"{"Name":"x"}"#).unwrap();
    op.finish().unwrap();
    writer.write_end_changeset().await.unwrap();
    writer.write_end_batch().await.unwrap();
    let payload = writer.into_inner().await.unwrap();

    let config = BatchConfig::default().with_read_chunk_size(7);
    let mut reader = AsyncBatchReader::for_requests(&payload[..], &content_type, config).unwrap();

    assert!(reader.read().await.unwrap());
    assert_eq!(reader.state(), BatchReaderState::ChangesetStart);
    assert_eq!(reader.current_group_id(), Some(group_id.as_str()));

    assert!(reader.read().await.unwrap());
    let mut op = reader.create_operation_request_message().await.unwrap();
    assert_eq!(op.content_id(), Some("1"));
    let mut body = Vec::new();
    op.body_stream().unwrap().read_to_end(&mut body).await.unwrap();
    assert_eq!(body, br#"{"Name":"x"}"#);

    assert!(reader.read().await.unwrap());
    assert_eq!(reader.state(), BatchReaderState::ChangesetEnd);
    assert!(!reader.read().await.unwrap());
    assert!(!reader.read().await.unwrap());
}

#[tokio::test]
async fn test_cancelled_reader_stops_at_next_fill() {
    init_tracing();

    let payload = br#"{"requests":[{"id":"1","method":"GET","url":"A"}]}"#;
    let token = CancellationToken::new();
    token.cancel();
    let mut reader = AsyncBatchReader::for_requests(&payload[..], "application/json", BatchConfig::default())
        .unwrap()
        .with_cancellation(token);

    assert!(matches!(reader.read().await, Err(BatchError::Cancelled)));
    assert_eq!(reader.state(), BatchReaderState::Exception);
    assert!(reader.read().await.unwrap_err().is_usage_error());
}

#[tokio::test]
async fn test_cancellation_interrupts_pending_read() {
    init_tracing();

    // The write half stays open, so the reader waits for bytes that never come.
    let (_tx, rx) = tokio::io::duplex(64);
    let token = CancellationToken::new();
    let mut reader = AsyncBatchReader::for_requests(rx, "application/json", BatchConfig::default())
        .unwrap()
        .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move { token.cancel() });
    let result = reader.read().await;
    canceller.await.unwrap();
    assert!(matches!(result, Err(BatchError::Cancelled)));
    assert_eq!(reader.state(), BatchReaderState::Exception);
}

#[tokio::test]
async fn test_cancelled_writer() {
    let token = CancellationToken::new();
    let mut writer = AsyncBatchWriter::json(Vec::new(), MessageKind::Response, BatchConfig::default())
        .with_cancellation(token.clone());
    writer.write_start_batch().await.unwrap();
    token.cancel();
    let err = writer.create_operation_response_message(Some("1")).await.unwrap_err();
    assert!(matches!(err, BatchError::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_independent_batches_run_concurrently() {
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            tokio::spawn(async move {
                let payload = format!(
                    r#"{{"requests":[{{"id":"{i}","method":"GET","url":"Customers({i})"}}]}}"#
                );
                let mut reader = AsyncBatchReader::for_requests(
                    payload.as_bytes(),
                    "application/json",
                    BatchConfig::default(),
                )
                .unwrap();
                assert!(reader.read().await.unwrap());
                let op = reader.create_operation_request_message().await.unwrap();
                op.url().to_string()
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), format!("Customers({})", i));
    }
}
