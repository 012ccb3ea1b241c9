// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod elf;
mod extract;
mod headers;
mod library_path;
pub mod package;
pub mod package_set;
