//! Run selector: finds the most recently created run.
//!
//! Run ids are zero-padded calendar timestamps, so the lexicographically
//! greatest collection name is also the newest run.

use crate::{
    error::SimResult,
    store::{RunHandle, RunStore},
};

/// Pick the greatest name carrying `<prefix>_`. `None` if there is none.
pub fn select_latest<'a, I>(names: I, prefix: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let marker = format!("{prefix}_");
    names.into_iter().filter(|n| n.starts_with(&marker)).max()
}

/// The newest run in `store`, or `None` when no run exists yet.
pub fn latest_run(store: &RunStore) -> SimResult<Option<RunHandle>> {
    let names = store.collection_names()?;
    match select_latest(names.iter().map(String::as_str), store.prefix()) {
        Some(name) => Ok(Some(RunHandle::from_collection(store.prefix(), name)?)),
        None => {
            log::info!("selector: no '{}' runs found", store.prefix());
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_lexicographic_max() {
        let names = [
            "simulations_20240101_090000",
            "simulations_20240101_100000",
            "simulations_20231231_235959",
        ];
        assert_eq!(
            select_latest(names, "simulations"),
            Some("simulations_20240101_100000")
        );
    }

    #[test]
    fn ignores_other_collections() {
        let names = ["run_registry", "zzz_other", "simulations_20240101_090000"];
        assert_eq!(
            select_latest(names, "simulations"),
            Some("simulations_20240101_090000")
        );
    }

    #[test]
    fn empty_is_none() {
        assert_eq!(select_latest(Vec::<&str>::new(), "simulations"), None);
        assert_eq!(select_latest(["zzz"], "simulations"), None);
    }
}
