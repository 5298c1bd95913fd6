//! Descriptor codec: canonicalize, digest, sign, parse, and validate server
//! descriptors and directories. See SPEC_FULL.md 4.1 and 4.1a.

pub mod canon;
pub mod codec;
pub mod consistency;
pub mod directory;
pub mod grammar;

pub use canon::canonicalize;
pub use codec::{build_and_sign, parse, validate, verify, Descriptor, DescriptorFields};
pub use consistency::check_consistency;
pub use directory::{parse_upload_response, Directory};
