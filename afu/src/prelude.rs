//! Prelude (helpful reexports) for this package

pub use crate::core::{
    afu_registers,
    read_afu_id,
    walk_features,
    AcquireError,
    Register,
    RegisterMap,
    USER_REG_ADDR,
};
pub use crate::mmio::{
    sim::SimAfu,
    uio::UioAfu,
    Mmio,
};
pub use crate::selftest::{
    Report,
    SelfTest,
};
pub use dfl::{
    AfuId,
    Dfh,
};
