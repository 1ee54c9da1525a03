//! Component-Part Cascader: lifts a host-record match onto the
//! host's ordered component-part sequence, all-or-nothing.

use tracing::error;

use crate::error::EngineError;
use crate::group_manager::GroupManager;
use crate::match_predicate::is_match;
use crate::model::Record;

async fn sorted_components(
    gm: &GroupManager,
    source_id: &str,
    linking_id: &str,
) -> Result<Vec<Record>, EngineError> {
    let mut components = gm.store.find_components(source_id, linking_id).await?;
    components.sort_by_key(|r| gm.strings.create_id_sort_key(&r.id));
    Ok(components)
}

/// Given a newly-matched host `host` (already carrying its fresh
/// `dedup_id`), attempt to pairwise-match its component-part sequence
/// against that of every other live, different-source member of its
/// group. Returns the number of component pairs matched (0 if no host
/// produced a full positional match).
pub async fn cascade_component_parts(gm: &GroupManager, host: &Record) -> Result<usize, EngineError> {
    let Some(linking_id) = host.linking_id.as_deref().filter(|s| !s.is_empty()) else {
        error!(record = %host.id, "cascade: host record has no linking id");
        return Ok(0);
    };
    let Some(group_id) = host.dedup_id.as_deref() else {
        return Ok(0);
    };

    let s_h = sorted_components(gm, &host.source_id, linking_id).await?;

    let Some(group) = gm.store.find_group(group_id).await? else {
        return Ok(0);
    };

    for other_id in &group.ids {
        if other_id == &host.id {
            continue;
        }
        let Some(other_host) = gm.store.find_record(other_id).await? else {
            continue;
        };
        if other_host.deleted || other_host.source_id == host.source_id {
            continue;
        }

        let s_other = match other_host.linking_id.as_deref().filter(|s| !s.is_empty()) {
            Some(other_linking_id) => sorted_components(gm, &other_host.source_id, other_linking_id).await?,
            None => Vec::new(),
        };

        if s_h.len() != s_other.len() {
            continue;
        }

        let mut all_match = true;
        for (c, c_other) in s_h.iter().zip(s_other.iter()) {
            let c_view = gm.view_of(c).await?;
            let c_other_view = gm.view_of(c_other).await?;
            let matched = is_match(
                c,
                c_view.as_ref(),
                c_other,
                c_other_view.as_ref(),
                gm.strings.as_ref(),
                gm.format_mapper.as_ref(),
            );
            if !matched {
                all_match = false;
                break;
            }
        }

        if all_match {
            for (c, c_other) in s_h.iter().zip(s_other.iter()) {
                gm.mark_duplicates(c, c_other, 0).await?;
            }
            return Ok(s_h.len());
        }
    }

    Ok(0)
}
