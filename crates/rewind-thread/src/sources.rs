//! Registry of every source known to the session and the relations between
//! generated, original, and pretty-printed variants.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use parking_lot::RwLock;
use rewind_core::protocol::{Location, MappedLocation, Source, SourceId, SourceKind};
use rewind_core::{deferred, invariant, Resolver, ThreadError, ThreadResult, Waiter};
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// Result of choosing among sources that show the same location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChosenSource {
    pub source_id: SourceId,
    /// The other variant a user can switch to, if any.
    pub alternate_id: Option<SourceId>,
}

impl ChosenSource {
    fn only(source_id: &SourceId) -> Self {
        ChosenSource {
            source_id: source_id.clone(),
            alternate_id: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    sources: IndexMap<SourceId, Source>,
    url_sources: HashMap<String, Vec<SourceId>>,
    /// generated id -> ids of sources that were generated from it.
    original_sources: HashMap<SourceId, Vec<SourceId>>,
    complete: bool,
    corresponding: HashMap<SourceId, Vec<SourceId>>,
    alternates: HashMap<SourceId, BTreeSet<SourceId>>,
    preferred_generated: HashSet<SourceId>,
}

pub struct SourceRegistry {
    inner: RwLock<Inner>,
    registered: watch::Sender<u64>,
    all_found: Resolver<()>,
    all_found_waiter: Waiter<()>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        let (all_found, all_found_waiter) = deferred();
        let (registered, _) = watch::channel(0);
        SourceRegistry {
            inner: RwLock::new(Inner::default()),
            registered,
            all_found,
            all_found_waiter,
        }
    }

    /// Record a source. Registering the same id again refreshes its metadata
    /// without duplicating index entries.
    pub fn register_source(&self, source: Source) {
        {
            let mut inner = self.inner.write();
            let id = source.source_id.clone();
            if let Some(url) = &source.url {
                let ids = inner.url_sources.entry(url.clone()).or_default();
                if !ids.contains(&id) {
                    ids.push(id.clone());
                }
            }
            for generated in &source.generated_source_ids {
                let originals = inner.original_sources.entry(generated.clone()).or_default();
                if !originals.contains(&id) {
                    originals.push(id.clone());
                }
            }
            trace!(source_id = %id, kind = ?source.kind, "registered source");
            inner.sources.insert(id, source);
        }
        self.registered.send_modify(|n| *n += 1);
    }

    /// Flip the registry to complete and compute corresponding-id groups.
    ///
    /// Only the first call has an effect. Waiters are released even when
    /// grouping reports an error.
    pub fn mark_all_sources_found(&self) -> ThreadResult<()> {
        let result = {
            let mut inner = self.inner.write();
            if inner.complete {
                return Ok(());
            }
            inner.complete = true;
            let (groups, result) = compute_groups(&inner);
            inner.corresponding = groups;
            info!(sources = inner.sources.len(), "all sources found");
            result
        };
        self.all_found.resolve(());
        result
    }

    pub fn is_complete(&self) -> bool {
        self.inner.read().complete
    }

    pub async fn ensure_all_sources(&self) {
        self.all_found_waiter.wait().await;
    }

    /// Wait until `source_id` has been registered and return it.
    pub async fn ensure_source(&self, source_id: &str) -> Source {
        let mut rx = self.registered.subscribe();
        loop {
            if let Some(source) = self.source(source_id) {
                return source;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn source(&self, source_id: &str) -> Option<Source> {
        self.inner.read().sources.get(source_id).cloned()
    }

    /// All sources in registration order.
    pub fn all_sources(&self) -> Vec<Source> {
        self.inner.read().sources.values().cloned().collect()
    }

    pub fn source_kind(&self, source_id: &str) -> Option<SourceKind> {
        self.inner.read().sources.get(source_id).map(|s| s.kind)
    }

    pub fn source_url_raw(&self, source_id: &str) -> Option<String> {
        self.inner.read().sources.get(source_id).and_then(|s| s.url.clone())
    }

    pub async fn source_url(&self, source_id: &str) -> Option<String> {
        self.ensure_source(source_id).await.url
    }

    pub fn generated_source_ids(&self, source_id: &str) -> Option<Vec<SourceId>> {
        self.inner
            .read()
            .sources
            .get(source_id)
            .map(|s| s.generated_source_ids.clone())
    }

    pub fn original_source_ids(&self, source_id: &str) -> Option<Vec<SourceId>> {
        self.inner.read().original_sources.get(source_id).cloned()
    }

    /// Ids for `url`, minus ids generated from another id in the same result.
    pub fn source_ids_for_url_raw(&self, url: &str) -> Vec<SourceId> {
        source_ids_for_url(&self.inner.read(), url)
    }

    pub async fn source_ids_for_url(&self, url: &str) -> Vec<SourceId> {
        self.ensure_all_sources().await;
        self.source_ids_for_url_raw(url)
    }

    /// Ids for `url`, minus ids that are originals of another id in the same result.
    pub fn generated_source_ids_for_url_raw(&self, url: &str) -> Vec<SourceId> {
        let inner = self.inner.read();
        let ids = inner.url_sources.get(url).cloned().unwrap_or_default();
        ids.iter()
            .filter(|id| {
                inner
                    .sources
                    .get(*id)
                    .map_or(true, |s| s.generated_source_ids.iter().all(|g| !ids.contains(g)))
            })
            .cloned()
            .collect()
    }

    pub async fn generated_source_ids_for_url(&self, url: &str) -> Vec<SourceId> {
        self.ensure_all_sources().await;
        self.generated_source_ids_for_url_raw(url)
    }

    pub fn is_minified_source(&self, source_id: &str) -> bool {
        is_minified(&self.inner.read(), source_id)
    }

    pub fn pretty_printed_source_id(&self, source_id: &str) -> Option<SourceId> {
        pretty_printed_id(&self.inner.read(), source_id)
    }

    pub fn is_source_mapped_source(&self, source_id: &str) -> bool {
        let inner = self.inner.read();
        matches!(
            resolved_kind(&inner, source_id),
            Ok(Some(SourceKind::SourceMapped))
        )
    }

    /// Mark a generated source as preferred over its originals, or undo that.
    pub fn prefer_source(&self, source_id: &str, value: bool) -> ThreadResult<()> {
        if self.is_source_mapped_source(source_id) {
            return Err(invariant(format!(
                "cannot prefer source-mapped source {source_id}"
            )));
        }
        let mut inner = self.inner.write();
        if value {
            inner.preferred_generated.insert(source_id.to_string());
        } else {
            inner.preferred_generated.remove(source_id);
        }
        debug!(source_id, value, "preferred source updated");
        Ok(())
    }

    pub fn has_preferred_generated_source(&self, locations: &[Location]) -> bool {
        let inner = self.inner.read();
        locations
            .iter()
            .any(|l| inner.preferred_generated.contains(&l.source_id))
    }

    /// Choose the source to show among ids that denote the same location.
    ///
    /// The result does not depend on the order of `source_ids`.
    pub fn choose_source_id(&self, source_ids: &[SourceId]) -> ThreadResult<ChosenSource> {
        choose_source_id(&self.inner.read(), source_ids)
    }

    /// Choose one source per group of alternates in `source_ids`.
    pub fn choose_source_id_list(&self, source_ids: &[SourceId]) -> ThreadResult<Vec<ChosenSource>> {
        self.memoize_alternates(source_ids);
        choose_source_id_list(&self.inner.read(), source_ids)
    }

    /// Partition `source_ids` into groups of generated/original alternates.
    pub fn group_source_ids(&self, source_ids: &[SourceId]) -> ThreadResult<Vec<Vec<SourceId>>> {
        self.memoize_alternates(source_ids);
        group_source_ids(&self.inner.read(), source_ids)
    }

    pub fn chosen_source_ids_for_url_raw(&self, url: &str) -> ThreadResult<Vec<ChosenSource>> {
        let ids = self.source_ids_for_url_raw(url);
        self.choose_source_id_list(&ids)
    }

    pub async fn chosen_source_ids_for_url(&self, url: &str) -> ThreadResult<Vec<ChosenSource>> {
        self.ensure_all_sources().await;
        self.chosen_source_ids_for_url_raw(url)
    }

    /// Every source reachable from `source_id` over generated/original edges.
    pub fn alternate_source_ids(&self, source_id: &str) -> ThreadResult<BTreeSet<SourceId>> {
        if let Some(known) = self.inner.read().alternates.get(source_id) {
            return Ok(known.clone());
        }
        let found = alternate_source_ids(&self.inner.read(), source_id)?;
        let mut inner = self.inner.write();
        if inner.complete {
            inner.alternates.insert(source_id.to_string(), found.clone());
        }
        Ok(found)
    }

    fn memoize_alternates(&self, source_ids: &[SourceId]) {
        for id in source_ids {
            let _ = self.alternate_source_ids(id);
        }
    }

    /// Sources equivalent to `source_id`, including itself. The first entry is
    /// the canonical id for the group.
    pub fn corresponding_source_ids(&self, source_id: &str) -> ThreadResult<Vec<SourceId>> {
        let inner = self.inner.read();
        if !inner.complete {
            return Err(ThreadError::NotReady(
                "corresponding source ids requested before all sources were found".to_string(),
            ));
        }
        Ok(inner
            .corresponding
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| vec![source_id.to_string()]))
    }

    /// Replace the location's source with the canonical corresponding id.
    pub fn update_location(&self, location: &mut Location) -> ThreadResult<()> {
        let ids = self.corresponding_source_ids(&location.source_id)?;
        if let Some(first) = ids.into_iter().next() {
            location.source_id = first;
        }
        Ok(())
    }

    pub fn update_mapped_location(&self, locations: &mut MappedLocation) -> ThreadResult<()> {
        for location in locations.iter_mut() {
            self.update_location(location)?;
        }
        Ok(())
    }

    /// The location to show for a mapped location, with its source normalised
    /// to the canonical corresponding id.
    pub fn preferred_location_raw(&self, locations: &[Location]) -> ThreadResult<Location> {
        let ids: Vec<SourceId> = locations.iter().map(|l| l.source_id.clone()).collect();
        let chosen = self.choose_source_id(&ids)?;
        let mut preferred = locations
            .iter()
            .find(|l| l.source_id == chosen.source_id)
            .cloned()
            .ok_or_else(|| invariant("no preferred location found"))?;
        if self.is_complete() {
            self.update_location(&mut preferred)?;
        }
        Ok(preferred)
    }

    pub async fn preferred_location(&self, locations: &[Location]) -> ThreadResult<Location> {
        self.ensure_all_sources().await;
        self.preferred_location_raw(locations)
    }

    /// The location in the alternate variant, if the chosen source has one.
    pub async fn alternate_location(&self, locations: &[Location]) -> ThreadResult<Option<Location>> {
        for location in locations {
            self.ensure_source(&location.source_id).await;
        }
        let ids: Vec<SourceId> = locations.iter().map(|l| l.source_id.clone()).collect();
        let chosen = self.choose_source_id(&ids)?;
        Ok(chosen
            .alternate_id
            .and_then(|alt| locations.iter().find(|l| l.source_id == alt).cloned()))
    }

    /// The location that is not an original of any other given location.
    pub fn generated_location(&self, locations: &[Location]) -> Option<Location> {
        let inner = self.inner.read();
        let ids: HashSet<&SourceId> = locations.iter().map(|l| &l.source_id).collect();
        locations
            .iter()
            .find(|l| match inner.sources.get(&l.source_id) {
                None => true,
                Some(source) => !source.generated_source_ids.iter().any(|g| ids.contains(g)),
            })
            .cloned()
    }
}

fn source_ids_for_url(inner: &Inner, url: &str) -> Vec<SourceId> {
    let ids = inner.url_sources.get(url).cloned().unwrap_or_default();
    ids.iter()
        .filter(|id| {
            inner
                .original_sources
                .get(*id)
                .map_or(true, |originals| originals.iter().all(|o| !ids.contains(o)))
        })
        .cloned()
        .collect()
}

fn pretty_printed_id(inner: &Inner, source_id: &str) -> Option<SourceId> {
    inner.original_sources.get(source_id).and_then(|originals| {
        originals
            .iter()
            .find(|id| {
                inner
                    .sources
                    .get(*id)
                    .is_some_and(|s| s.kind == SourceKind::PrettyPrinted)
            })
            .cloned()
    })
}

fn is_minified(inner: &Inner, source_id: &str) -> bool {
    pretty_printed_id(inner, source_id).is_some()
}

/// Kind of a source, looking through pretty-printing to the minified source.
/// `Ok(None)` means the source or its minified source is not known yet.
fn resolved_kind(inner: &Inner, source_id: &str) -> ThreadResult<Option<SourceKind>> {
    let Some(source) = inner.sources.get(source_id) else {
        return Ok(None);
    };
    if source.kind != SourceKind::PrettyPrinted {
        return Ok(Some(source.kind));
    }
    let Some(minified) = source
        .generated_source_ids
        .first()
        .and_then(|id| inner.sources.get(id))
    else {
        return Ok(None);
    };
    if minified.kind == SourceKind::PrettyPrinted {
        return Err(invariant(format!(
            "pretty-printed source {source_id} was generated from another pretty-printed source"
        )));
    }
    Ok(Some(minified.kind))
}

fn choose_source_id(inner: &Inner, source_ids: &[SourceId]) -> ThreadResult<ChosenSource> {
    let mut ids: Vec<&SourceId> = source_ids.iter().collect();
    ids.sort();
    ids.dedup();
    let Some(fallback) = ids.first().copied() else {
        return Err(invariant("cannot choose from an empty list of sources"));
    };

    let kind_of = |id: &str| inner.sources.get(id).map(|s| s.kind);
    if ids.iter().any(|id| kind_of(id) == Some(SourceKind::Html)) {
        ids.retain(|id| kind_of(id) != Some(SourceKind::InlineScript));
    }
    ids.retain(|id| !is_minified(inner, id));

    let mut generated: Option<&SourceId> = None;
    let mut original: Option<&SourceId> = None;
    for id in ids {
        let Some(kind) = resolved_kind(inner, id)? else {
            // Not all sources are known yet.
            return Ok(ChosenSource::only(id));
        };
        if kind == SourceKind::SourceMapped {
            original = Some(id);
        } else if let Some(existing) = generated {
            return Err(invariant(format!(
                "more than one generated source in group: {existing} and {id}"
            )));
        } else {
            generated = Some(id);
        }
    }

    match (generated, original) {
        (None, original) => {
            if original.is_none() {
                debug!(fallback = %fallback, "no generated or original source, using first candidate");
            }
            Ok(ChosenSource::only(original.unwrap_or(fallback)))
        }
        (Some(generated), None) => Ok(ChosenSource::only(generated)),
        (Some(generated), Some(original)) => {
            if inner.preferred_generated.contains(generated) {
                Ok(ChosenSource {
                    source_id: generated.clone(),
                    alternate_id: Some(original.clone()),
                })
            } else {
                Ok(ChosenSource {
                    source_id: original.clone(),
                    alternate_id: Some(generated.clone()),
                })
            }
        }
    }
}

fn alternate_source_ids(inner: &Inner, source_id: &str) -> ThreadResult<BTreeSet<SourceId>> {
    if let Some(known) = inner.alternates.get(source_id) {
        return Ok(known.clone());
    }
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([source_id.to_string()]);
    while let Some(id) = queue.pop_front() {
        if found.contains(&id) {
            continue;
        }
        let source = inner
            .sources
            .get(&id)
            .ok_or_else(|| ThreadError::UnknownSource(id.clone()))?;
        queue.extend(source.generated_source_ids.iter().cloned());
        if let Some(originals) = inner.original_sources.get(&id) {
            queue.extend(originals.iter().cloned());
        }
        found.insert(id);
    }
    Ok(found)
}

fn group_source_ids(inner: &Inner, source_ids: &[SourceId]) -> ThreadResult<Vec<Vec<SourceId>>> {
    let mut remaining: Vec<SourceId> = source_ids.to_vec();
    let mut groups = Vec::new();
    while let Some(first) = remaining.first() {
        let alternates = alternate_source_ids(inner, first)?;
        let group: Vec<SourceId> = remaining
            .iter()
            .filter(|id| alternates.contains(*id))
            .cloned()
            .collect();
        remaining.retain(|id| !group.contains(id));
        groups.push(group);
    }
    Ok(groups)
}

fn choose_source_id_list(inner: &Inner, source_ids: &[SourceId]) -> ThreadResult<Vec<ChosenSource>> {
    group_source_ids(inner, source_ids)?
        .iter()
        .map(|group| choose_source_id(inner, group))
        .collect()
}

/// Group key for content-hash matching. Pretty-printed sources have no hash
/// of their own and use their minified source's hash under a distinct prefix.
fn content_key(inner: &Inner, source_id: &str) -> ThreadResult<String> {
    let source = inner
        .sources
        .get(source_id)
        .ok_or_else(|| ThreadError::UnknownSource(source_id.to_string()))?;
    if source.kind == SourceKind::PrettyPrinted {
        let [minified_id] = source.generated_source_ids.as_slice() else {
            return Err(invariant(format!(
                "pretty-printed source {source_id} must have exactly one generated source"
            )));
        };
        let hash = inner
            .sources
            .get(minified_id)
            .and_then(|m| m.content_hash.as_ref())
            .ok_or_else(|| invariant(format!("minified source {minified_id} has no content hash")))?;
        return Ok(format!("minified:{hash}"));
    }
    source
        .content_hash
        .clone()
        .ok_or_else(|| invariant(format!("source {source_id} has no content hash")))
}

fn group_by_content_hash(inner: &Inner, source_ids: &[SourceId]) -> ThreadResult<Vec<Vec<SourceId>>> {
    let mut by_hash: IndexMap<String, Vec<SourceId>> = IndexMap::new();
    for id in source_ids {
        by_hash.entry(content_key(inner, id)?).or_default().push(id.clone());
    }
    Ok(by_hash.into_values().collect())
}

/// Candidate equivalence groups for all sources sharing `url`.
fn url_groups(inner: &Inner, url: &str) -> ThreadResult<Vec<Vec<SourceId>>> {
    let chosen = choose_source_id_list(inner, &source_ids_for_url(inner, url))?;
    if chosen.is_empty() {
        return Err(invariant(format!("no chosen source ids for url {url}")));
    }
    let preferred: Vec<SourceId> = chosen.iter().map(|c| c.source_id.clone()).collect();
    let alternates: Vec<SourceId> = chosen.iter().filter_map(|c| c.alternate_id.clone()).collect();
    let mut groups = group_by_content_hash(inner, &preferred)?;
    groups.extend(group_by_content_hash(inner, &alternates)?);
    Ok(groups)
}

/// Compute corresponding-id groups for every source.
///
/// Groups that share a member are merged so the relation stays symmetric.
/// Members are ordered by registration. A url whose grouping fails leaves
/// its sources in singleton groups; the first failure is returned.
fn compute_groups(inner: &Inner) -> (HashMap<SourceId, Vec<SourceId>>, ThreadResult<()>) {
    let order: HashMap<&SourceId, usize> = inner.sources.keys().enumerate().map(|(i, id)| (id, i)).collect();
    let mut parent: Vec<usize> = (0..inner.sources.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut first_error = None;
    let mut seen_urls = HashSet::new();
    for source in inner.sources.values() {
        let Some(url) = &source.url else { continue };
        if !seen_urls.insert(url.as_str()) {
            continue;
        }
        match url_groups(inner, url) {
            Ok(groups) => {
                for group in groups {
                    let members: Vec<usize> = group.iter().filter_map(|id| order.get(id).copied()).collect();
                    if let Some((&head, rest)) = members.split_first() {
                        for &member in rest {
                            let a = find(&mut parent, head);
                            let b = find(&mut parent, member);
                            parent[b] = a;
                        }
                    }
                }
            }
            Err(err) => {
                error!(%url, error = %err, "failed to group sources for url");
                first_error.get_or_insert(err);
            }
        }
    }

    let ids: Vec<&SourceId> = inner.sources.keys().collect();
    let mut components: HashMap<usize, Vec<SourceId>> = HashMap::new();
    for (i, id) in ids.iter().enumerate() {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push((*id).clone());
    }
    let mut groups = HashMap::new();
    for members in components.into_values() {
        for id in &members {
            groups.insert(id.clone(), members.clone());
        }
    }
    (groups, first_error.map_or(Ok(()), Err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(id: &str, url: &str, hash: &str) -> Source {
        Source::new(id, SourceKind::ScriptSource).with_url(url).with_hash(hash)
    }

    fn original(id: &str, url: &str, hash: &str, from: &[&str]) -> Source {
        Source::new(id, SourceKind::SourceMapped)
            .with_url(url)
            .with_hash(hash)
            .with_generated(from)
    }

    fn ids(list: &[&str]) -> Vec<SourceId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn registry(sources: Vec<Source>) -> SourceRegistry {
        let registry = SourceRegistry::new();
        for source in sources {
            registry.register_source(source);
        }
        registry
    }

    #[test]
    fn test_choose_prefers_original() {
        let reg = registry(vec![
            generated("gen1", "a.js", "h1"),
            original("orig1", "a.ts", "h2", &["gen1"]),
        ]);
        let chosen = reg.choose_source_id(&ids(&["gen1", "orig1"])).unwrap();
        assert_eq!(chosen.source_id, "orig1");
        assert_eq!(chosen.alternate_id.as_deref(), Some("gen1"));
    }

    #[test]
    fn test_prefer_source_swaps_roles() {
        let reg = registry(vec![
            generated("G", "a.js", "h1"),
            original("O", "a.ts", "h2", &["G"]),
        ]);
        reg.prefer_source("G", true).unwrap();
        let chosen = reg.choose_source_id(&ids(&["G", "O"])).unwrap();
        assert_eq!(chosen.source_id, "G");
        assert_eq!(chosen.alternate_id.as_deref(), Some("O"));

        reg.prefer_source("G", false).unwrap();
        assert_eq!(reg.choose_source_id(&ids(&["O", "G"])).unwrap().source_id, "O");
    }

    #[test]
    fn test_prefer_source_mapped_is_rejected() {
        let reg = registry(vec![
            generated("G", "a.js", "h1"),
            original("O", "a.ts", "h2", &["G"]),
        ]);
        assert!(matches!(
            reg.prefer_source("O", true),
            Err(ThreadError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_choose_is_order_independent() {
        let reg = registry(vec![
            Source::new("html", SourceKind::Html)
                .with_url("index.html")
                .with_hash("h0")
                .with_generated(&["inline"]),
            Source::new("inline", SourceKind::InlineScript)
                .with_url("index.html")
                .with_hash("h1"),
            generated("min", "app.min.js", "h2"),
            Source::new("pretty", SourceKind::PrettyPrinted)
                .with_url("app.min.js")
                .with_generated(&["min"]),
        ]);
        let forward = reg.choose_source_id(&ids(&["html", "inline"])).unwrap();
        let backward = reg.choose_source_id(&ids(&["inline", "html"])).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.source_id, "html");

        let forward = reg.choose_source_id(&ids(&["min", "pretty"])).unwrap();
        let backward = reg.choose_source_id(&ids(&["pretty", "min"])).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.source_id, "pretty");
    }

    #[test]
    fn test_two_generated_is_invariant_violation() {
        let reg = registry(vec![generated("a", "a.js", "h1"), generated("b", "b.js", "h2")]);
        assert!(matches!(
            reg.choose_source_id(&ids(&["a", "b"])),
            Err(ThreadError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_only_originals_falls_back() {
        let reg = registry(vec![original("o", "a.ts", "h1", &[])]);
        assert_eq!(reg.choose_source_id(&ids(&["o"])).unwrap().source_id, "o");
    }

    #[test]
    fn test_unknown_candidate_returns_early() {
        let reg = registry(vec![generated("g", "a.js", "h1")]);
        let chosen = reg.choose_source_id(&ids(&["g", "later"])).unwrap();
        assert_eq!(chosen, ChosenSource::only(&"later".to_string()));
        let chosen = reg.choose_source_id(&ids(&["a-unknown", "g"])).unwrap();
        assert_eq!(chosen, ChosenSource::only(&"a-unknown".to_string()));
    }

    #[test]
    fn test_corresponding_not_ready_before_completion() {
        let reg = registry(vec![generated("g", "a.js", "h1")]);
        assert!(matches!(
            reg.corresponding_source_ids("g"),
            Err(ThreadError::NotReady(_))
        ));
        reg.mark_all_sources_found().unwrap();
        assert_eq!(reg.corresponding_source_ids("g").unwrap(), ids(&["g"]));
    }

    #[test]
    fn test_corresponding_groups_by_url_and_hash() {
        let reg = registry(vec![
            generated("g1", "a.js", "same"),
            generated("g2", "a.js", "same"),
            generated("g3", "a.js", "other"),
            Source::new("anon", SourceKind::ScriptSource).with_hash("same"),
        ]);
        reg.mark_all_sources_found().unwrap();
        assert_eq!(reg.corresponding_source_ids("g1").unwrap(), ids(&["g1", "g2"]));
        assert_eq!(reg.corresponding_source_ids("g2").unwrap(), ids(&["g1", "g2"]));
        assert_eq!(reg.corresponding_source_ids("g3").unwrap(), ids(&["g3"]));
        assert_eq!(reg.corresponding_source_ids("anon").unwrap(), ids(&["anon"]));
    }

    #[test]
    fn test_pretty_printed_grouped_by_minified_hash() {
        let reg = registry(vec![
            generated("m1", "lib.js", "h"),
            generated("m2", "lib.js", "h"),
            Source::new("p1", SourceKind::PrettyPrinted)
                .with_url("lib.js")
                .with_generated(&["m1"]),
            Source::new("p2", SourceKind::PrettyPrinted)
                .with_url("lib.js")
                .with_generated(&["m2"]),
        ]);
        reg.mark_all_sources_found().unwrap();
        assert!(reg.is_minified_source("m1"));
        assert_eq!(reg.pretty_printed_source_id("m2").as_deref(), Some("p2"));
        assert_eq!(reg.corresponding_source_ids("p1").unwrap(), ids(&["p1", "p2"]));
        assert_eq!(reg.corresponding_source_ids("p2").unwrap(), ids(&["p1", "p2"]));
    }

    #[test]
    fn test_grouping_error_still_completes() {
        let reg = registry(vec![Source::new("nohash", SourceKind::ScriptSource).with_url("x.js")]);
        assert!(reg.mark_all_sources_found().is_err());
        assert!(reg.is_complete());
        assert_eq!(reg.corresponding_source_ids("nohash").unwrap(), ids(&["nohash"]));
        // Only the first call computes anything.
        assert!(reg.mark_all_sources_found().is_ok());
    }

    #[test]
    fn test_source_ids_for_url_filters_duplicates() {
        let reg = registry(vec![
            Source::new("html", SourceKind::Html)
                .with_url("index.html")
                .with_hash("h0")
                .with_generated(&["inline"]),
            Source::new("inline", SourceKind::InlineScript)
                .with_url("index.html")
                .with_hash("h1"),
        ]);
        assert_eq!(reg.source_ids_for_url_raw("index.html"), ids(&["html"]));
        assert_eq!(reg.generated_source_ids_for_url_raw("index.html"), ids(&["inline"]));
        assert!(reg.source_ids_for_url_raw("missing.js").is_empty());
    }

    #[test]
    fn test_alternates_memoised_only_when_complete() {
        let reg = registry(vec![generated("g", "a.js", "h1")]);
        assert_eq!(reg.alternate_source_ids("g").unwrap().len(), 1);
        reg.register_source(original("o", "a.ts", "h2", &["g"]));
        // Not memoised yet, so the new edge is seen.
        assert_eq!(reg.alternate_source_ids("g").unwrap().len(), 2);
        reg.mark_all_sources_found().unwrap();
        let both = reg.alternate_source_ids("o").unwrap();
        assert!(both.contains("g") && both.contains("o"));
    }

    #[test]
    fn test_group_source_ids() {
        let reg = registry(vec![
            generated("g1", "a.js", "h1"),
            original("o1", "a.ts", "h2", &["g1"]),
            generated("g2", "b.js", "h3"),
        ]);
        let groups = reg.group_source_ids(&ids(&["g1", "g2", "o1"])).unwrap();
        assert_eq!(groups, vec![ids(&["g1", "o1"]), ids(&["g2"])]);
        let chosen = reg.choose_source_id_list(&ids(&["g1", "g2", "o1"])).unwrap();
        assert_eq!(chosen[0].source_id, "o1");
        assert_eq!(chosen[1].source_id, "g2");
    }

    #[test]
    fn test_generated_location() {
        let reg = registry(vec![
            generated("g", "a.js", "h1"),
            original("o", "a.ts", "h2", &["g"]),
        ]);
        let locations = vec![Location::new("o", 3, 0), Location::new("g", 10, 4)];
        assert_eq!(reg.generated_location(&locations).unwrap().source_id, "g");
    }

    #[tokio::test]
    async fn test_preferred_location_end_to_end() {
        let reg = registry(vec![
            generated("gen1", "a.js", "hash"),
            original("orig1", "a.js", "hash", &["gen1"]),
        ]);
        reg.mark_all_sources_found().unwrap();
        let locations = vec![Location::new("gen1", 1, 0), Location::new("orig1", 5, 2)];
        let preferred = reg.preferred_location(&locations).await.unwrap();
        assert_eq!(preferred.source_id, "orig1");
        assert_eq!(preferred.line, 5);
        let alternate = reg.alternate_location(&locations).await.unwrap().unwrap();
        assert_eq!(alternate.source_id, "gen1");
    }

    #[tokio::test]
    async fn test_ensure_source_waits_for_registration() {
        let reg = std::sync::Arc::new(SourceRegistry::new());
        let waiter = {
            let reg = std::sync::Arc::clone(&reg);
            tokio::spawn(async move { reg.ensure_source("late").await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        reg.register_source(generated("late", "late.js", "h"));
        assert_eq!(waiter.await.unwrap().source_id, "late");
        assert_eq!(reg.source_url("late").await.as_deref(), Some("late.js"));
    }
}
