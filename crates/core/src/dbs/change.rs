use serde::{Deserialize, Serialize};

use crate::val::Id;

/// A record of a single row write.
///
/// `old_id` is the id the row had before the write. It only differs from
/// `id` when an update changed the primary key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
	pub id: Id,
	pub old_id: Id,
	#[serde(default)]
	pub deleted: bool,
}

impl Change {
	pub fn inserted(id: Id) -> Change {
		Change {
			old_id: id.clone(),
			id,
			deleted: false,
		}
	}

	pub fn updated(old_id: Id, id: Id) -> Change {
		Change {
			id,
			old_id,
			deleted: false,
		}
	}

	pub fn deleted(id: Id) -> Change {
		Change {
			old_id: id.clone(),
			id,
			deleted: true,
		}
	}
}

/// Merges a sequence of changes to one entity so that each row is
/// described by a single record.
///
/// A change whose `old_id` is the current id of an earlier change folds
/// into it, keeping the earliest `old_id`.
pub fn coalesce(changes: Vec<Change>) -> Vec<Change> {
	let mut out: Vec<Change> = Vec::with_capacity(changes.len());
	for change in changes {
		match out.iter_mut().find(|c| !c.deleted && c.id == change.old_id) {
			Some(prev) => {
				prev.id = change.id;
				prev.deleted = change.deleted;
			}
			None => out.push(change),
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn coalesces_renames_and_deletes() {
		let out = coalesce(vec![
			Change::updated(1.into(), 50.into()),
			Change::deleted(3.into()),
			Change::updated(50.into(), 99.into()),
			Change::inserted(7.into()),
			Change::deleted(7.into()),
		]);
		assert_eq!(
			out,
			vec![
				Change::updated(1.into(), 99.into()),
				Change::deleted(3.into()),
				Change::deleted(7.into()),
			]
		);
	}
}
