use std::collections::HashSet;

use crate::dbs::{Change, EntityMetadata};
use crate::proto::LiveQueryChange;
use crate::val::{Id, Row};

/// Computes the messages which turn the result set a client holds into
/// the current result set of a query.
///
/// `last_ids` are the ids the client holds, `current` the rows the query
/// returns now and `changes` the writes which triggered this pass.
/// Returns the messages along with the ids of the current rows.
pub fn diff(
	meta: &dyn EntityMetadata,
	last_ids: &[Id],
	current: Vec<Row>,
	changes: &[Change],
) -> (Vec<LiveQueryChange>, Vec<Id>) {
	let current: Vec<(Id, Row)> =
		current.into_iter().filter_map(|row| Some((meta.id_of(&row)?, row))).collect();
	let current_ids: Vec<Id> = current.iter().map(|(id, _)| id.clone()).collect();
	let now: HashSet<&Id> = current_ids.iter().collect();
	let last: HashSet<&Id> = last_ids.iter().collect();
	let mut messages = Vec::new();
	// Rows the client holds which no longer match
	for id in last_ids {
		if now.contains(id) {
			continue;
		}
		// A renamed row which still matches is covered by a replace
		let renamed =
			changes.iter().any(|c| !c.deleted && c.old_id == *id && c.id != *id && now.contains(&c.id));
		if !renamed {
			messages.push(LiveQueryChange::Remove {
				id: id.clone(),
			});
		}
	}
	// Rows which changed or newly match
	for (id, row) in current {
		match changes.iter().find(|c| c.id == id && last.contains(&c.old_id)) {
			Some(c) => messages.push(LiveQueryChange::Replace {
				old_id: c.old_id.clone(),
				item: row,
			}),
			None if !last.contains(&id) => messages.push(LiveQueryChange::Add(row)),
			None => {}
		}
	}
	(messages, current_ids)
}
