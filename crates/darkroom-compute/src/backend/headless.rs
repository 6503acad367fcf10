//! Platform without any accelerator.

use super::platform::{Adapter, AdapterRequest, Platform};
use crate::{ComputeError, ComputeResult};

/// Platform that never finds an adapter; every call runs on the CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPlatform;

impl Platform for HeadlessPlatform {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn request_adapter(&self, _request: &AdapterRequest) -> ComputeResult<Box<dyn Adapter>> {
        Err(ComputeError::AdapterNotFound)
    }
}
