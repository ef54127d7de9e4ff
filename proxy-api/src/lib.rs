#![forbid(unsafe_code)]

//! Protocol definitions shared by the switchyard control plane and its clients.
//!
//! - [`delivery`]: the resource discovery protocol proxies use to stream configuration.
//! - [`extension`]: the hook protocol the control plane uses to call out-of-process extensions.

pub mod delivery {
    pub mod v1 {
        tonic::include_proto!("switchyard.delivery.v1");
    }

    pub use self::v1::*;
}

pub mod extension {
    pub mod v1 {
        tonic::include_proto!("switchyard.extension.v1");
    }

    pub use self::v1::*;
}
