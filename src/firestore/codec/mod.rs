//! Conversion between application types and wire values.
//!
//! Records declare their members through [`RecordSchema`]; a [`Codec`] resolves those
//! declarations into wire names under its [`NamingPolicy`] and drives encode, decode and
//! in-place patching.

#[allow(clippy::module_inception)]
mod codec;
mod converter;
mod field_codec;
mod naming;
mod record;
mod schema;

pub use codec::{missing_converter, Codec, CodecOptions};
pub use converter::{FnConverter, ValueConverter};
pub use field_codec::{FieldCodec, MapKey};
pub use naming::NamingPolicy;
pub use record::Record;
pub use schema::{
    resolve, FieldAccess, FieldDescriptor, MemberAccess, MemberAttribute, MemberOrigin,
    RecordSchema, ResolvedSchema, WireNameCollision,
};
