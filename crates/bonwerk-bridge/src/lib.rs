// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk — host platform collaborators.
//
// The traits in `traits` describe what the engine needs from the host: the
// permission system, Bluetooth/USB enumeration and channels, and the native
// printer driver.  `stub` is the desktop implementation; `memory` is a
// scriptable one for tests and demos.  Mobile hosts implement the traits on
// their side of the FFI boundary.

use std::sync::Arc;

pub mod memory;
pub mod stub;
pub mod traits;

pub use memory::InMemoryBridge;
pub use stub::StubBridge;
pub use traits::*;

/// The bridge for the platform this binary runs on.
pub fn platform_bridge() -> Arc<dyn PlatformBridge> {
    Arc::new(StubBridge)
}
