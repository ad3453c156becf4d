//! Local-disk copy of the active credential used when the primary store is unreachable.

// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, CredentialSource},
	store::{
		StoreError,
		file::{read_if_present, write_atomic},
	},
};

/// Durable single-record mirror of the slot's active credential.
///
/// Writes go to the primary path and only reach the secondary path when the primary write
/// fails. Reads consider both files and return the most recently issued record.
#[derive(Clone, Debug)]
pub struct FallbackFile {
	primary: PathBuf,
	secondary: Option<PathBuf>,
}
impl FallbackFile {
	/// Creates a fallback rooted at `primary`.
	pub fn new(primary: impl Into<PathBuf>) -> Self {
		Self { primary: primary.into(), secondary: None }
	}

	/// Adds a secondary location tried when the primary path cannot be written.
	pub fn with_secondary(mut self, secondary: impl Into<PathBuf>) -> Self {
		self.secondary = Some(secondary.into());

		self
	}

	/// Primary file location.
	pub fn primary_path(&self) -> &Path {
		&self.primary
	}

	/// Secondary file location, if configured.
	pub fn secondary_path(&self) -> Option<&Path> {
		self.secondary.as_deref()
	}

	/// Writes `record` and returns the path that received it.
	pub fn save(&self, record: &CredentialRecord) -> Result<&Path, StoreError> {
		let bytes = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize fallback record: {e}"),
		})?;

		match (write_atomic(&self.primary, &bytes), &self.secondary) {
			(Ok(()), _) => Ok(&self.primary),
			(Err(e), Some(secondary)) => {
				tracing::warn!(
					path = %self.primary.display(),
					error = %e,
					"Primary fallback path is not writable; using the secondary path."
				);

				write_atomic(secondary, &bytes)?;

				Ok(secondary)
			},
			(Err(e), None) => Err(e),
		}
	}

	/// Loads the most recently issued record across both locations.
	///
	/// Unreadable or corrupt copies are skipped with a warning; the call only fails when no
	/// copy could be read and at least one location reported an error.
	pub fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
		let mut newest: Option<CredentialRecord> = None;
		let mut last_error = None;

		for path in std::iter::once(self.primary.as_path()).chain(self.secondary.as_deref()) {
			match Self::read_one(path) {
				Ok(Some(record)) =>
					if newest.as_ref().is_none_or(|current| record.issued_at > current.issued_at) {
						newest = Some(record);
					},
				Ok(None) => {},
				Err(e) => {
					tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable fallback copy.");

					last_error = Some(e);
				},
			}
		}

		match (newest, last_error) {
			(Some(record), _) => Ok(Some(record.with_source(CredentialSource::LocalFallback))),
			(None, Some(e)) => Err(e),
			(None, None) => Ok(None),
		}
	}

	fn read_one(path: &Path) -> Result<Option<CredentialRecord>, StoreError> {
		let Some(bytes) = read_if_present(path)? else {
			return Ok(None);
		};
		let record: CredentialRecord = serde_json::from_slice(&bytes).map_err(|e| {
			StoreError::Serialization { message: format!("Failed to parse {}: {e}", path.display()) }
		})?;

		record.validate().map_err(|e| StoreError::InvalidRecord {
			message: format!("{}: {e}", path.display()),
		})?;

		Ok(Some(record))
	}
}
