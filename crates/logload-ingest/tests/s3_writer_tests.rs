//! S3 writer failure paths against a mock XML endpoint

use bytes::Bytes;
use logload_common::types::SourceReference;
use logload_ingest::{
    config::ClientConfig,
    storage::{s3::PART_SIZE, ObjectStore, S3ObjectStore},
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OBJECT_PATH: &str = "/logload-test/a.zip/big.log";

async fn mock_store(server: &MockServer) -> S3ObjectStore {
    let endpoint = server.uri();
    let config = ClientConfig::from_lookup(|name| match name {
        "STORAGE_ENDPOINT" => Some(endpoint.clone()),
        "STORAGE_HMAC_ACCESS_KEY" => Some("GOOG1TEST".to_string()),
        "STORAGE_HMAC_SECRET" => Some("secret".to_string()),
        _ => None,
    })
    .unwrap();
    S3ObjectStore::new(&config).await.unwrap()
}

async fn mount_multipart_start(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(OBJECT_PATH))
        .and(query_param("uploads", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<InitiateMultipartUploadResult>\
             <Bucket>logload-test</Bucket><Key>a.zip/big.log</Key><UploadId>upload-1</UploadId>\
             </InitiateMultipartUploadResult>",
        ))
        .mount(server)
        .await;
}

async fn mount_abort(server: &MockServer) {
    Mock::given(method("DELETE"))
        .and(path(OBJECT_PATH))
        .and(query_param("uploadId", "upload-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(server)
        .await;
}

fn rejected() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_string(
        "<Error><Code>InvalidPart</Code><Message>part rejected</Message></Error>",
    )
}

#[tokio::test]
async fn test_failed_complete_aborts_upload() {
    let server = MockServer::start().await;
    mount_multipart_start(&server).await;
    Mock::given(method("PUT"))
        .and(path(OBJECT_PATH))
        .and(query_param("uploadId", "upload-1"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"etag\""))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(OBJECT_PATH))
        .and(query_param("uploadId", "upload-1"))
        .respond_with(rejected())
        .expect(1)
        .mount(&server)
        .await;
    mount_abort(&server).await;

    let store = mock_store(&server).await;
    let object = SourceReference::new("logload-test", "a.zip/big.log");
    let mut writer = store.open_write(&object).await.unwrap();
    writer.write(Bytes::from(vec![7u8; PART_SIZE + 10])).await.unwrap();

    let err = writer.finish().await.unwrap_err();
    assert!(format!("{:#}", err).contains("CompleteMultipartUpload"), "{:#}", err);
}

#[tokio::test]
async fn test_failed_tail_part_aborts_upload() {
    let server = MockServer::start().await;
    mount_multipart_start(&server).await;
    Mock::given(method("PUT"))
        .and(path(OBJECT_PATH))
        .and(query_param("partNumber", "1"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"etag\""))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(OBJECT_PATH))
        .and(query_param("partNumber", "2"))
        .respond_with(rejected())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(OBJECT_PATH))
        .and(query_param("uploadId", "upload-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    mount_abort(&server).await;

    let store = mock_store(&server).await;
    let object = SourceReference::new("logload-test", "a.zip/big.log");
    let mut writer = store.open_write(&object).await.unwrap();
    writer.write(Bytes::from(vec![7u8; PART_SIZE + 10])).await.unwrap();

    let err = writer.finish().await.unwrap_err();
    assert!(format!("{:#}", err).contains("UploadPart 2"), "{:#}", err);
}
