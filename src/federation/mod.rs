//! ActivityPub federation module
//!
//! Handles:
//! - Remote object resolution (fetch, validate, materialize once)
//! - Actor resolution and WebFinger canonicalization
//! - HTTP Signatures (outbound signed fetch, inbound verification)
//! - The local system actor

mod actor;
mod dedup;
mod domain;
mod error;
mod keys;
mod ld;
mod negotiator;
mod note;
mod resolver;
mod signature;
mod steps;
mod system_actor;
mod validator;
mod verifier;
mod webfinger;

pub use actor::{ActorResolver, CanonicalHandle, ParsedActor};
pub use dedup::{CanonicalRecord, DedupError, DedupStore, Materialized, RecordStore};
pub use domain::{DomainBlocklist, extract_domain};
pub use error::{FetchError, ResolutionStep, ResolveError, SchemaError};
pub use keys::{Keypair, generate_keypair};
pub use negotiator::{
    ACCEPT_ACTIVITYPUB, ContentNegotiator, FetchResult, decode_body, parse_content_type,
};
pub use note::{ParsedPost, RemoteEmoji};
pub use resolver::Resolver;
pub use signature::{
    RequestSigner, SignatureError, parse_signature_header, sign_request, verify_signature,
};
pub use steps::Outcome;
pub use system_actor::{SYSTEM_USERNAME, SystemActor};
pub use validator::{ObjectKind, ValidatedDocument, validate};
pub use verifier::ActorKeyVerifier;
pub use webfinger::{
    WebFingerResponse, WebFingerResult, generate_webfinger_response, parse_handle,
    resolve_webfinger,
};
