// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    iter::Iterator,
    path::{Path, PathBuf},
};

use crate::extract::{extract_binpkg, ExtractedPackage};
use crate::package::{FileMetadata, FileType, Package, PackageUid, SymlinkMetadata};

pub struct PackageSet {
    dir: PathBuf,
    packages: Vec<PackageUid>,
    owners: HashMap<PathBuf, (PackageUid, FileType)>,
}

/// Validates that no two packages have the same unique identifier.
fn validate_unique_packages(packages: &[ExtractedPackage]) -> Result<()> {
    let mut unique_packages: BTreeSet<&PackageUid> = BTreeSet::new();
    for pkg in packages {
        if !unique_packages.insert(&pkg.uid) {
            bail!("Found multiple tbz2 files for package {:?}", pkg.uid)
        }
    }
    Ok(())
}

/// Creates a mapping from file to the package which it came from.
/// If multiple packages contain the same file, then returns an error.
fn calculate_owners(
    packages: &[ExtractedPackage],
) -> Result<HashMap<PathBuf, (PackageUid, FileType)>> {
    let mut owners: HashMap<PathBuf, (PackageUid, FileType)> = HashMap::new();
    for pkg in packages {
        for file in &pkg.content.files {
            let file_type = match &file.symlink {
                None => FileType::Unknown,
                Some(path) => FileType::Symlink(SymlinkMetadata {
                    target: path.to_path_buf(),
                }),
            };
            if let Some(old_owner) = owners.insert(file.path.clone(), (pkg.uid.clone(), file_type))
            {
                bail!(
                    "Conflict: Packages {:?} and {:?} both create file {:?}",
                    old_owner,
                    pkg.uid,
                    file.path,
                );
            }
        }
    }
    Ok(owners)
}

impl PackageSet {
    /// Creates a set of packages, validating that:
    /// * No two packages have the same identifier.
    /// * No two packages contain the same file
    pub fn create<P: AsRef<Path>>(dir: &Path, packages: &[P]) -> Result<Self> {
        let packages = packages
            .iter()
            .map(|tbz2| extract_binpkg(tbz2.as_ref(), dir))
            .collect::<Result<Vec<ExtractedPackage>>>()?;

        validate_unique_packages(&packages)?;

        Ok(PackageSet {
            dir: dir.to_path_buf(),
            owners: calculate_owners(&packages)?,
            packages: packages.into_iter().map(|pkg| pkg.uid).collect(),
        })
    }

    /// Returns an iterator through all files that we haven't yet determined the file type for.
    fn unknown_files(&self) -> impl Iterator<Item = &Path> {
        self.owners
            .iter()
            .flat_map(|(path, (_, file_type))| match file_type {
                FileType::Unknown => Some(path.as_path()),
                _ => None,
            })
    }

    /// Sets the filetype of a file.
    fn set_filetype(&mut self, path: &Path, value: FileType) -> Result<()> {
        let (_, file_type) = self
            .owners
            .get_mut(path)
            .with_context(|| format!("{path:?} must exist in package set"))?;
        *file_type = value;
        Ok(())
    }

    pub fn fill_headers(&mut self, header_file_dir_regexes: &[Regex]) -> Result<BTreeSet<PathBuf>> {
        let header_files = crate::headers::filter_header_files(
            &self.unknown_files().collect::<Vec<_>>(),
            header_file_dir_regexes,
        )?;
        for path in header_files.header_files {
            self.set_filetype(&path, FileType::HeaderFile)?;
        }
        Ok(header_files.header_file_dirs)
    }

    pub fn generate_ld_library_path(&self, directory_regexes: &[Regex]) -> Result<Vec<PathBuf>> {
        crate::library_path::generate_ld_library_path(
            &self.unknown_files().collect::<Vec<_>>(),
            directory_regexes,
        )
    }

    pub fn fill_shared_libraries(&mut self, ld_library_path: &[PathBuf]) -> Result<()> {
        let shared_libs = crate::library_path::calculate_shared_libraries(
            &self.unknown_files().collect::<Vec<_>>(),
            ld_library_path,
        )?;
        // Convert it from a Path that borrows self immutably to a PathBuf to allow us to call
        // set_filetype safely.
        let shared_libs = shared_libs
            .iter()
            .map(|p| p.to_path_buf())
            .collect::<Vec<_>>();
        for path in shared_libs {
            self.set_filetype(&path, FileType::SharedLibrary)?;
        }
        Ok(())
    }

    pub fn wrap_elf_files(&mut self, ld_library_path: &[PathBuf]) -> Result<()> {
        let metadata =
            crate::elf::wrap_elf_files(&self.dir, ld_library_path, self.unknown_files())?;
        for (path, metadata) in metadata {
            self.set_filetype(&path, FileType::ElfBinary(metadata))?;
        }
        Ok(())
    }

    pub fn into_packages(self) -> Vec<Package> {
        let mut uid_to_files: BTreeMap<PackageUid, BTreeMap<PathBuf, FileMetadata>> =
            BTreeMap::new();
        for (path, (pkg, file_type)) in self.owners {
            uid_to_files
                .entry(pkg)
                .or_default()
                .insert(path, FileMetadata { file_type });
        }
        // Preserve the original package order.
        self.packages
            .into_iter()
            .map(|uid| Package {
                content: uid_to_files.entry(uid.clone()).or_default().clone(),
                uid,
            })
            .collect()
    }
}
