// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub const MARKER_FILE_NAME: &str = "DURABLE_TREE";
pub const RAW_DIR_NAME: &str = "raw";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const EXTRA_TARBALL_FILE_NAME: &str = "extra.tar.zst";

pub const RESTORED_XATTR: &str = "user.durabletree.restored";

pub const MODE_MASK: u32 = 0o7777;
