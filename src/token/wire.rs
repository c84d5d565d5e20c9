//! Token Wire Messages
//!
//! A token is `"wf_r_" + base58(SignedToken)`, where `SignedToken.token`
//! holds the encoded [`ReadWorkflowToken`] and `SignedToken.signature` the
//! Ed25519 signature over exactly those bytes.

/// Payload granting read access to one workflow until `expire_at`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadWorkflowToken {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub workflow_id: ::prost::alloc::string::String,
    /// Unix seconds
    #[prost(int64, tag = "3")]
    pub expire_at: i64,
}

/// Envelope pairing the encoded payload with its signature.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedToken {
    #[prost(bytes = "vec", tag = "1")]
    pub token: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: ::prost::alloc::vec::Vec<u8>,
}
