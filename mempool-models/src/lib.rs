//! Value types exchanged between pool workers: worker and object identifiers,
//! distributed references, file-backed references, fetch replies and the
//! payload envelope, together with their wire serializers.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

pub mod payload;
pub mod reference;
pub mod worker;
