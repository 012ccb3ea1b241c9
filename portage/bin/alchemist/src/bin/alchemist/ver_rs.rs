// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Standalone `ver_rs` utility, as specified by PMS §12.3 (EAPI 7's
//! "ver_rs" ebuild helper), for use from recipe phase scripts rather than
//! the (silent, scope-reduced) shell function of the same name the
//! metadata-evaluation prelude defines.

use anyhow::{bail, Context, Result};

#[derive(clap::Args, Clone, Debug)]
pub struct Args {
    /// Alternating <range> <new-separator> pairs, optionally followed by a
    /// trailing version string. When the version is omitted, `$PV` is used.
    args: Vec<String>,
}

/// One `<range>` operand: either a single 1-based separator index, or an
/// (inclusive) `start-end` range, or an open-ended `start-` range.
#[derive(Debug, Clone, Copy)]
struct Range {
    start: usize,
    end: Option<usize>,
}

impl Range {
    fn parse(s: &str) -> Result<Self> {
        if let Some((start, end)) = s.split_once('-') {
            let start: usize = start.parse().with_context(|| format!("bad range: {s}"))?;
            if end.is_empty() {
                Ok(Range { start, end: None })
            } else {
                let end: usize = end.parse().with_context(|| format!("bad range: {s}"))?;
                Ok(Range {
                    start,
                    end: Some(end),
                })
            }
        } else {
            let n: usize = s.parse().with_context(|| format!("bad range: {s}"))?;
            Ok(Range {
                start: n,
                end: Some(n),
            })
        }
    }

    fn contains(&self, index: usize) -> bool {
        index >= self.start && self.end.map_or(true, |end| index <= end)
    }
}

const SEPARATORS: [char; 3] = ['.', '-', '_'];

/// Replaces the separators of `version` selected by `range` with `new_sep`,
/// per PMS's `ver_rs`: separators are numbered 1-based in the order they
/// appear in the version string.
fn replace_separators(version: &str, range: Range, new_sep: &str) -> String {
    let mut out = String::with_capacity(version.len());
    let mut sep_index = 0usize;
    for c in version.chars() {
        if SEPARATORS.contains(&c) {
            sep_index += 1;
            if range.contains(sep_index) {
                out.push_str(new_sep);
                continue;
            }
        }
        out.push(c);
    }
    out
}

pub fn ver_rs_main(args: Args) -> Result<()> {
    let mut operands = args.args;
    if operands.is_empty() {
        bail!("ver_rs: at least a <range> and a replacement string are required");
    }

    // An odd number of operands means the last one is the version to
    // operate on; an even number means default to $PV.
    let version = if operands.len() % 2 == 1 {
        operands.pop().unwrap()
    } else {
        std::env::var("PV").context("ver_rs: no version given and $PV is unset")?
    };

    if operands.is_empty() || operands.len() % 2 != 0 {
        bail!("ver_rs: <range> and replacement arguments must come in pairs");
    }

    let mut result = version;
    for pair in operands.chunks(2) {
        let range = Range::parse(&pair[0])?;
        result = replace_separators(&result, range, &pair[1]);
    }

    println!("{result}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_single_index() {
        assert_eq!(
            replace_separators("1.2.3", Range::parse("2").unwrap(), "-"),
            "1.2-3"
        );
    }

    #[test]
    fn replaces_range() {
        assert_eq!(
            replace_separators("1.2.3.4", Range::parse("2-3").unwrap(), "_"),
            "1.2_3_4"
        );
    }

    #[test]
    fn replaces_open_range() {
        assert_eq!(
            replace_separators("1.2.3.4", Range::parse("2-").unwrap(), "_"),
            "1.2_3_4"
        );
    }

    #[test]
    fn leaves_unselected_separators_alone() {
        assert_eq!(
            replace_separators("1.2.3", Range::parse("1").unwrap(), "-"),
            "1-2.3"
        );
    }
}
