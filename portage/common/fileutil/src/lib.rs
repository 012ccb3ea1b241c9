// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod r#move;
mod remove;
mod symlink_forest;
mod tempdir;
mod xattr;

pub use crate::xattr::*;
pub use r#move::*;
pub use remove::*;
pub use symlink_forest::*;
pub use tempdir::*;
