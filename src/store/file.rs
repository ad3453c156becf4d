//! Simple file-backed [`CredentialStore`] for single-host deployments.

// std
use std::{
	fs::{self, File, OpenOptions},
	io::Write,
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, SlotId},
	store::{CredentialStore, RotationOutcome, StoreError, StoreFuture, ledger},
};

type Ledgers = BTreeMap<SlotId, Vec<CredentialRecord>>;

/// Persists every slot ledger to one JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Ledgers>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Ledgers, StoreError> {
		let Some(bytes) = read_if_present(path)? else {
			return Ok(Ledgers::new());
		};

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn persist_locked(&self, contents: &Ledgers) -> Result<(), StoreError> {
		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;

		write_atomic(&self.path, &serialized)
	}

	/// Applies `mutate` to a copy of the slot ledger and persists it; memory only changes once
	/// the file write succeeded.
	fn mutate<T>(
		&self,
		slot: &SlotId,
		mutate: impl FnOnce(&mut Vec<CredentialRecord>) -> Result<(T, bool), StoreError>,
	) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let mut entries = guard.get(slot).cloned().unwrap_or_default();
		let (value, changed) = mutate(&mut entries)?;

		if changed {
			let mut next = guard.clone();

			next.insert(slot.clone(), entries);
			self.persist_locked(&next)?;
			*guard = next;
		}

		Ok(value)
	}
}
impl CredentialStore for FileStore {
	fn fetch_active<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move {
			Ok(self.inner.read().get(slot).and_then(|entries| ledger::active(entries).cloned()))
		})
	}

	fn install(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let slot = record.slot.clone();

			self.mutate(&slot, |entries| {
				ledger::install(entries, record, now)?;

				Ok(((), true))
			})
		})
	}

	fn rotate<'a>(
		&'a self,
		expected_refresh: &'a str,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, RotationOutcome> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let slot = replacement.slot.clone();

			self.mutate(&slot, |entries| {
				let outcome = ledger::rotate(entries, expected_refresh, replacement, now)?;

				Ok((outcome, outcome == RotationOutcome::Rotated))
			})
		})
	}

	fn revoke<'a>(
		&'a self,
		slot: &'a SlotId,
		expected_refresh: &'a str,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move {
			self.mutate(slot, |entries| {
				let revoked = ledger::revoke(entries, expected_refresh, instant);
				let changed = revoked.is_some();

				Ok((revoked, changed))
			})
		})
	}

	fn history<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Vec<CredentialRecord>> {
		Box::pin(async move { Ok(self.inner.read().get(slot).cloned().unwrap_or_default()) })
	}
}

pub(crate) fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

/// Returns the file contents, or `None` when the file is missing or empty.
pub(crate) fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
	let bytes = match fs::read(path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) =>
			return Err(StoreError::Backend {
				message: format!("Failed to read {}: {e}", path.display()),
			}),
	};

	Ok((!bytes.is_empty()).then_some(bytes))
}

/// Writes `bytes` to a sibling temp file, syncs it, then renames it over `path`.
///
/// On Unix the file is created with mode `0600`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
	ensure_parent_exists(path)?;

	let mut tmp_path = path.to_path_buf();

	tmp_path.set_extension("tmp");

	{
		let mut file = owner_only(OpenOptions::new().write(true).create(true).truncate(true))
			.open(&tmp_path)
			.map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

		file.write_all(bytes).map_err(|e| StoreError::Backend {
			message: format!("Failed to write {}: {e}", tmp_path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", tmp_path.display()),
		})?;
	}

	fs::rename(&tmp_path, path).map_err(|e| StoreError::Backend {
		message: format!("Failed to replace {}: {e}", path.display()),
	})?;

	// Directory fsync makes the rename durable; not every platform allows opening a directory.
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		let _ = File::open(parent).and_then(|dir| dir.sync_all());
	}

	Ok(())
}

#[cfg(unix)]
fn owner_only(options: &mut OpenOptions) -> &mut OpenOptions {
	use std::os::unix::fs::OpenOptionsExt;

	options.mode(0o600)
}

#[cfg(not(unix))]
fn owner_only(options: &mut OpenOptions) -> &mut OpenOptions {
	options
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"oauth2_keeper_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_record(refresh: &str) -> CredentialRecord {
		CredentialRecord::builder(SlotId::default())
			.access_token(format!("access-{refresh}"))
			.refresh_token(refresh)
			.expires_in(Duration::hours(6))
			.build()
			.expect("Failed to build file-store test record.")
	}

	#[test]
	fn ledger_survives_reopen() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let slot = SlotId::default();

		rt.block_on(store.install(build_record("r1")))
			.expect("Failed to install fixture record into file store.");

		let outcome = rt
			.block_on(store.rotate("r1", build_record("r2")))
			.expect("Failed to rotate fixture record.");

		assert_eq!(outcome, RotationOutcome::Rotated);

		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let active = rt
			.block_on(reopened.fetch_active(&slot))
			.expect("Failed to fetch fixture record from file store.")
			.expect("File store lost the active record after reopen.");
		let history =
			rt.block_on(reopened.history(&slot)).expect("Failed to read file store history.");

		assert_eq!(active.access_token.expose(), "access-r2");
		assert_eq!(history.len(), 2);
		assert!(!history[0].active);
		assert!(history[0].deactivated_at.is_some());

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;

			let mode = fs::metadata(&path).expect("Snapshot should exist.").permissions().mode();

			assert_eq!(mode & 0o777, 0o600);
		}

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn mismatched_rotation_leaves_file_untouched() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");

		rt.block_on(store.install(build_record("r1"))).expect("Install should succeed.");

		let before = fs::read(&path).expect("Snapshot should exist after install.");
		let outcome =
			rt.block_on(store.rotate("stale", build_record("r2"))).expect("Rotate should run.");

		assert_eq!(outcome, RotationOutcome::RefreshMismatch);
		assert_eq!(fs::read(&path).expect("Snapshot should still exist."), before);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
