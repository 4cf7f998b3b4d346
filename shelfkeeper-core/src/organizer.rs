//! Library organizer: moves a converted book into its templated, deduplicated
//! home under the library root (spec §4.2).
//!
//! Grounded on `kobold.organizer.LibraryOrganizer` and its module-level
//! `_generate_unique_path` helper.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::Book;
use crate::path_template::{sanitize_filename, PathTemplate};

const MAX_UNIQUE_ATTEMPTS: u32 = 1000;

/// Outcome of a single `organize` call, reported back to the stage processor
/// for logging and for deciding what to persist on the `Book` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeOutcome {
    /// Organization is disabled, or the book is already at its target path.
    Unchanged,
    /// The file was moved to `to`.
    Moved { to: PathBuf },
    /// The incoming file is byte-identical (by content hash) to a file
    /// already at the target path; the source was removed and the existing
    /// file kept.
    DeduplicatedAgainstExisting { kept: PathBuf },
}

/// Computes a SHA-256 digest of a file's contents, used both to fingerprint
/// newly ingested books and to detect duplicates during organization.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub struct LibraryOrganizer {
    library_root: PathBuf,
    template: PathTemplate,
    enabled: bool,
}

impl LibraryOrganizer {
    pub fn new(library_root: impl Into<PathBuf>, template: impl Into<String>, enabled: bool) -> Self {
        Self {
            library_root: library_root.into(),
            template: PathTemplate::new(template),
            enabled,
        }
    }

    /// Build the template variable map for a book, applying the same
    /// defaults as the original organizer (unknown author, zero-padded
    /// series index, publication year only). Only the directory-shaping
    /// variables from spec §4.1 live here — the target *filename* always
    /// comes from the book's own current basename, not from the template.
    fn template_variables(&self, book: &Book) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("title".to_string(), book.title.clone());
        vars.insert(
            "author".to_string(),
            book.author.clone().unwrap_or_else(|| "Unknown Author".to_string()),
        );
        if let Some(series) = &book.series {
            vars.insert("series".to_string(), series.clone());
        }
        if let Some(idx) = book.series_index {
            vars.insert("series_index".to_string(), format!("{idx:02}"));
        }
        if let Some(lang) = &book.language {
            vars.insert("language".to_string(), lang.clone());
        }
        if let Some(genre) = &book.genre {
            vars.insert("genre".to_string(), genre.clone());
        }
        if let Some(date) = book.publication_date {
            vars.insert("year".to_string(), date.format("%Y").to_string());
        }
        vars
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The fully-qualified path this book should live at, given its current
    /// metadata: `library_root / render(template, book) / sanitize(basename(current_path))`
    /// (spec §4.2). The template renders the directory only; the filename is
    /// always the book's own sanitized basename, never reconstructed from
    /// `title`/`ext`.
    pub fn organize_path(&self, book: &Book) -> PathBuf {
        let vars = self.template_variables(book);
        let dir = self.template.render(&vars);
        let filename = sanitize_filename(
            &book
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );

        let mut target = self.library_root.clone();
        if dir != "." {
            target = target.join(dir);
        }
        target.join(filename)
    }

    /// Move `book.file_path` into its organized location, deduplicating
    /// against an existing file at the destination by content hash and
    /// disambiguating genuine collisions with a numeric suffix.
    ///
    /// On success, `book.file_path` is updated to the new location (or left
    /// untouched if the source was discarded as a duplicate).
    pub fn organize(&self, book: &mut Book) -> Result<OrganizeOutcome> {
        if !self.enabled {
            return Ok(OrganizeOutcome::Unchanged);
        }

        let target = self.organize_path(book);
        if target == book.file_path {
            return Ok(OrganizeOutcome::Unchanged);
        }

        if target.exists() {
            let existing_hash = hash_file(&target)?;
            if existing_hash == book.file_hash {
                debug!(path = %book.file_path.display(), existing = %target.display(), "duplicate content, removing source");
                match fs::remove_file(&book.file_path) {
                    Ok(()) => {
                        book.file_path = target.clone();
                        book.mark_updated();
                        return Ok(OrganizeOutcome::DeduplicatedAgainstExisting { kept: target });
                    }
                    Err(e) => {
                        warn!(path = %book.file_path.display(), error = %e, "failed to remove duplicate source, falling back to rename");
                    }
                }
            }
            let unique_target = generate_unique_path(&target)?;
            self.move_file(book, unique_target.clone())?;
            self.move_kepub_alongside(book);
            return Ok(OrganizeOutcome::Moved { to: unique_target });
        }

        self.move_file(book, target.clone())?;
        self.move_kepub_alongside(book);
        Ok(OrganizeOutcome::Moved { to: target })
    }

    /// Move the derived kepub file alongside the just-relocated primary
    /// file, if one exists. Best-effort: the primary move has already
    /// succeeded, so a failure here is logged, not propagated.
    fn move_kepub_alongside(&self, book: &mut Book) {
        let Some(kepub_path) = book.kepub_path.clone() else {
            return;
        };
        if !kepub_path.exists() {
            return;
        }
        let Some(primary_parent) = book.file_path.parent() else {
            return;
        };
        let kepub_name = kepub_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut target = primary_parent.join(&kepub_name);

        if target.exists() && target != kepub_path {
            match generate_unique_path(&target) {
                Ok(unique) => target = unique,
                Err(e) => {
                    warn!(error = %e, "could not find a unique name for the derived file, leaving it in place");
                    return;
                }
            }
        }

        match fs::rename(&kepub_path, &target) {
            Ok(()) => {
                book.kepub_path = Some(target);
            }
            Err(e) => {
                warn!(from = %kepub_path.display(), to = %target.display(), error = %e, "failed to move derived file alongside primary");
            }
        }
    }

    fn move_file(&self, book: &mut Book, target: PathBuf) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&book.file_path, &target)?;
        info!(from = %book.file_path.display(), to = %target.display(), "organized book");
        book.file_path = target;
        book.mark_updated();
        Ok(())
    }
}

/// Find a free sibling of `path` by inserting `_N` before the extension,
/// trying `N` from 1 to 1000.
fn generate_unique_path(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let ext = path.extension().and_then(|e| e.to_str());

    for n in 1..=MAX_UNIQUE_ATTEMPTS {
        let candidate_name = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    warn!(path = %path.display(), "exhausted unique name attempts");
    Err(Error::ExhaustedUniqueNames(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn book_at(path: PathBuf, hash: &str) -> Book {
        let mut book = Book::new_ingested(
            "Emma".to_string(),
            path,
            hash.to_string(),
            100,
            "epub".to_string(),
        );
        book.author = Some("Jane Austen".to_string());
        book
    }

    #[test]
    fn organize_moves_file_to_templated_path_preserving_basename() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("incoming.epub");
        fs::write(&src, b"hello").unwrap();

        let organizer = LibraryOrganizer::new(
            dir.path().join("library"),
            "{author}/{title}",
            true,
        );
        let mut book = book_at(src.clone(), &hash_file(&src).unwrap());
        let outcome = organizer.organize(&mut book).unwrap();

        let expected = dir.path().join("library/Jane Austen/Emma/incoming.epub");
        assert_eq!(outcome, OrganizeOutcome::Moved { to: expected.clone() });
        assert_eq!(book.file_path, expected);
        assert!(expected.exists());
        assert!(!src.exists());
    }

    #[test]
    fn organize_disabled_is_noop() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("incoming.epub");
        fs::write(&src, b"hello").unwrap();

        let organizer = LibraryOrganizer::new(dir.path().join("library"), "{title}", false);
        let mut book = book_at(src.clone(), &hash_file(&src).unwrap());
        let outcome = organizer.organize(&mut book).unwrap();

        assert_eq!(outcome, OrganizeOutcome::Unchanged);
        assert!(src.exists());
    }

    #[test]
    fn duplicate_content_removes_source_and_updates_book_path() {
        let dir = tempdir().unwrap();
        let organizer = LibraryOrganizer::new(dir.path().join("library"), "{title}", true);

        let existing = dir.path().join("library/Emma/incoming.epub");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"same bytes").unwrap();

        let src = dir.path().join("incoming.epub");
        fs::write(&src, b"same bytes").unwrap();

        let mut book = book_at(src.clone(), &hash_file(&src).unwrap());
        let outcome = organizer.organize(&mut book).unwrap();

        assert_eq!(
            outcome,
            OrganizeOutcome::DeduplicatedAgainstExisting { kept: existing.clone() }
        );
        assert!(!src.exists());
        assert!(existing.exists());
        assert_eq!(book.file_path, existing, "book must not keep pointing at the deleted source");
    }

    #[test]
    fn colliding_different_content_gets_unique_suffix() {
        let dir = tempdir().unwrap();
        let organizer = LibraryOrganizer::new(dir.path().join("library"), "{title}", true);

        let existing = dir.path().join("library/Emma/incoming.epub");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"original bytes").unwrap();

        let src = dir.path().join("incoming.epub");
        fs::write(&src, b"different bytes").unwrap();

        let mut book = book_at(src.clone(), &hash_file(&src).unwrap());
        let outcome = organizer.organize(&mut book).unwrap();

        let expected = dir.path().join("library/Emma/incoming_1.epub");
        assert_eq!(outcome, OrganizeOutcome::Moved { to: expected.clone() });
        assert!(expected.exists());
        assert!(existing.exists());
    }

    #[test]
    fn already_at_target_is_unchanged() {
        let dir = tempdir().unwrap();
        let organizer = LibraryOrganizer::new(dir.path().join("library"), "{title}", true);
        let target = dir.path().join("library/Emma/incoming.epub");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"hello").unwrap();

        let mut book = book_at(target.clone(), &hash_file(&target).unwrap());
        let outcome = organizer.organize(&mut book).unwrap();
        assert_eq!(outcome, OrganizeOutcome::Unchanged);
    }
}
