// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod fakefs;
mod golden;
mod namespace;
mod testdata;

pub use fakefs::*;
pub use golden::*;
pub use namespace::*;
pub use testdata::*;
