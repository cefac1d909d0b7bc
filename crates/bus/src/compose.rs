//! Derived dispatchers
//!
//! Every function here builds a new [`Dispatcher`] from existing ones. Unless
//! stated otherwise the result shares the source channels: publishing into
//! the original stays visible through the derived dispatcher, while
//! publishing into the derived one copies the channel first.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use contracts::{DataCode, SourceId, TimeStamp};

use crate::dispatch_data::DispatchData;
use crate::dispatcher::{DispatchDataMap, Dispatcher};

/// Channels of `src` accepted by `predicate`.
///
/// Priorities of the accepted sources are copied; with `include_priorities`
/// those of rejected sources are copied as well.
pub fn filter_channels<F>(src: &Dispatcher, predicate: F, include_priorities: bool) -> Dispatcher
where
    F: FnMut(DataCode, &SourceId) -> bool,
{
    filter_and_map_channels(src, predicate, include_priorities, |_, _, data| data.clone())
}

/// Like [`filter_channels`], registering `mapper(code, source, data)` instead
/// of each accepted entry.
pub fn filter_and_map_channels<F, M>(
    src: &Dispatcher,
    mut predicate: F,
    include_priorities: bool,
    mut mapper: M,
) -> Dispatcher
where
    F: FnMut(DataCode, &SourceId) -> bool,
    M: FnMut(DataCode, &SourceId, &DispatchData) -> DispatchData,
{
    let mut dst = src.empty_like();
    for (code, source, data) in src.entries() {
        let accepted = predicate(code, source);
        if accepted {
            dst.set_shared(code, source.clone(), mapper(code, source, data));
        }
        if accepted || include_priorities {
            copy_priority(src, &mut dst, source);
        }
    }
    dst
}

/// Every channel of `src`, shared, with all of its priorities.
pub fn shallow_copy(src: &Dispatcher) -> Dispatcher {
    let mut dst = filter_channels(src, |_, _| true, true);
    copy_priorities(src, &mut dst);
    dst
}

/// Unshared copies of every channel keeping the samples with
/// `from <= time <= to`. A `None` bound is open.
pub fn crop_dispatcher(src: &Dispatcher, from: Option<TimeStamp>, to: Option<TimeStamp>) -> Dispatcher {
    let mut dst = src.empty_like();
    for (_, source, data) in src.entries() {
        dst.insert_owned(data.cropped(from, to).renamed(source.clone()));
    }
    copy_priorities(src, &mut dst);
    debug!(
        from = ?from,
        to = ?to,
        channels = dst.entries().count(),
        "Cropped dispatcher"
    );
    dst
}

/// Copy every registered priority of `src` into `dst`
pub fn copy_priorities(src: &Dispatcher, dst: &mut Dispatcher) {
    for (source, priority) in src.source_priorities().iter() {
        dst.set_source_priority(source.clone(), priority);
    }
}

fn copy_priority(src: &Dispatcher, dst: &mut Dispatcher, source: &SourceId) {
    if let Some(priority) = src.source_priorities().get(source) {
        dst.set_source_priority(source.clone(), priority);
    }
}

/// Union of two channel maps; on a (code, source) collision `b` wins.
pub fn merge_dispatch_data_maps(a: &DispatchDataMap, b: &DispatchDataMap) -> DispatchDataMap {
    let mut dst = a.clone();
    for (&code, sources) in b {
        let dst_sources = dst.entry(code).or_default();
        for (source, data) in sources {
            dst_sources.insert(source.clone(), data.clone());
        }
    }
    dst
}

/// `src`'s channels overlaid with `to_add`, sharing all of them. Priorities
/// of the sources `src` has channels for are copied.
pub fn merge_dispatcher_with_dispatch_data_map(
    src: &Dispatcher,
    to_add: &DispatchDataMap,
) -> Dispatcher {
    let merged = merge_dispatch_data_maps(src.all_sources(), to_add);
    let mut dst = src.empty_like();
    for (code, sources) in merged {
        for (source, data) in sources {
            if data.kind() == code.kind() {
                dst.set_shared(code, source, data);
            } else {
                warn!(code = %code, source = %source, "Skipping entry of unexpected type");
            }
        }
    }
    for (_, source, _) in src.entries() {
        copy_priority(src, &mut dst, source);
    }
    dst
}

/// Codes whose source maps differ between `a` and `b`.
///
/// Channels are compared by identity, not content. A code missing from one
/// map differs from any entry for it in the other, even an empty one.
pub fn list_data_codes_with_differences(a: &DispatchDataMap, b: &DispatchDataMap) -> BTreeSet<DataCode> {
    a.keys()
        .chain(b.keys())
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|code| !equal_source_maps(a.get(code), b.get(code)))
        .collect()
}

fn equal_source_maps(
    a: Option<&BTreeMap<SourceId, DispatchData>>,
    b: Option<&BTreeMap<SourceId, DispatchData>>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.len() == b.len()
                && a.iter().all(|(source, x)| b.get(source).is_some_and(|y| x.ptr_eq(y)))
        }
        _ => false,
    }
}
