//! Wire constants for OData batch payloads.

/// Version token used in every framed start line.
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Header names.
pub mod headers {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_ID: &str = "Content-ID";
    pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
    pub const HOST: &str = "Host";
    pub const LOCATION: &str = "Location";
    pub const ODATA_VERSION: &str = "OData-Version";
}

/// Media types recognised at the batch and part level.
pub mod media_types {
    pub const MULTIPART_MIXED: &str = "multipart/mixed";
    pub const APPLICATION_HTTP: &str = "application/http";
    pub const APPLICATION_JSON: &str = "application/json";
    pub const BINARY_TRANSFER_ENCODING: &str = "binary";
}

/// Multipart boundary prefixes.
pub mod boundaries {
    pub const BATCH_REQUEST: &str = "batch_";
    pub const BATCH_RESPONSE: &str = "batchresponse_";
    pub const CHANGESET_REQUEST: &str = "changeset_";
    pub const CHANGESET_RESPONSE: &str = "changesetresponse_";
    /// RFC 2046 §5.1.1.
    pub const MAX_LENGTH: usize = 70;
}

/// Property names of the JSON batch format.
pub mod json_props {
    pub const REQUESTS: &str = "requests";
    pub const RESPONSES: &str = "responses";
    pub const ID: &str = "id";
    pub const ATOMICITY_GROUP: &str = "atomicityGroup";
    pub const DEPENDS_ON: &str = "dependsOn";
    pub const METHOD: &str = "method";
    pub const URL: &str = "url";
    pub const HEADERS: &str = "headers";
    pub const BODY: &str = "body";
    pub const STATUS: &str = "status";
}
