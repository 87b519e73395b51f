//! Paginated and recursive browsing of a ContentDirectory tree.
//!
//! Every call borrows the session's action-invoke capability; the browser
//! holds no session state. Recursive traversal fans out one scoped thread
//! per child container and joins them all, so a failure in any branch fails
//! the whole aggregate.

use std::str::FromStr;
use std::sync::Arc;
use std::thread;

use tracing::debug;

use pavanedidl::{Container, Item, MediaObjectRecord, decode_fragment};

use crate::CONTENT_DIRECTORY_SERVICE;
use crate::client::ActionInvoker;
use crate::errors::ControlPointError;

/// Browse flag selector of the ContentDirectory Browse action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseMode {
    Children,
    Metadata,
}

impl BrowseMode {
    fn flag(self) -> &'static str {
        match self {
            BrowseMode::Children => "BrowseDirectChildren",
            BrowseMode::Metadata => "BrowseMetadata",
        }
    }
}

impl FromStr for BrowseMode {
    type Err = ControlPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "children" => Ok(BrowseMode::Children),
            "metadata" => Ok(BrowseMode::Metadata),
            other => Err(ControlPointError::UnknownBrowseType(other.to_string())),
        }
    }
}

/// Per-call replacements for the Browse action defaults
/// (Filter="*", StartingIndex=0, RequestedCount=0, SortCriteria="").
#[derive(Debug, Clone, Default)]
pub struct BrowseOverrides {
    pub starting_index: Option<u32>,
    pub requested_count: Option<u32>,
    pub sort_criteria: Option<String>,
}

/// Outcome of one Browse call. The counters are kept as the literal strings
/// the device returned.
#[derive(Debug, Clone, Default)]
pub struct BrowseResult {
    pub number_returned: String,
    pub total_matches: String,
    pub raw_xml: Option<String>,
    pub containers: Vec<Container>,
    pub items: Vec<Item>,
}

/// Composite result of [`ContentBrowser::browse_object_id`].
#[derive(Debug, Clone)]
pub struct ObjectBrowse {
    pub children: BrowseResult,
    pub metadata: BrowseResult,
}

/// A container encountered during traversal. Not retained past the walk.
#[derive(Debug, Clone)]
pub struct ContainerNode {
    pub id: String,
    pub title: String,
}

impl From<&Container> for ContainerNode {
    fn from(container: &Container) -> Self {
        Self {
            id: container.id.clone(),
            title: container.title.clone(),
        }
    }
}

pub struct ContentBrowser {
    invoker: Arc<dyn ActionInvoker>,
}

impl ContentBrowser {
    pub fn new(invoker: Arc<dyn ActionInvoker>) -> Self {
        Self { invoker }
    }

    /// One Browse call against the device.
    ///
    /// A NumberReturned of "0" short-circuits to an empty result without
    /// decoding the Result payload. `return_raw` attaches the undecoded
    /// DIDL-Lite fragment alongside the parsed lists, on the zero path too.
    pub fn browse_content(
        &self,
        object_id: &str,
        mode: BrowseMode,
        return_raw: bool,
        overrides: &BrowseOverrides,
    ) -> Result<BrowseResult, ControlPointError> {
        let start = overrides.starting_index.unwrap_or(0).to_string();
        let count = overrides.requested_count.unwrap_or(0).to_string();
        let sort = overrides.sort_criteria.clone().unwrap_or_default();
        let args = [
            ("ObjectID", object_id),
            ("BrowseFlag", mode.flag()),
            ("Filter", "*"),
            ("StartingIndex", start.as_str()),
            ("RequestedCount", count.as_str()),
            ("SortCriteria", sort.as_str()),
        ];

        let response = self
            .invoker
            .invoke_action("Browse", &args, CONTENT_DIRECTORY_SERVICE)?;

        let number_returned = response.require("NumberReturned")?.to_string();
        let total_matches = response.require("TotalMatches")?.to_string();
        let didl_xml = response.require("Result")?;

        if number_returned == "0" {
            return Ok(BrowseResult {
                number_returned,
                total_matches,
                raw_xml: return_raw.then(|| didl_xml.to_string()),
                ..BrowseResult::default()
            });
        }

        let didl = decode_fragment(didl_xml)?;
        debug!(
            object_id,
            containers = didl.containers.len(),
            items = didl.items.len(),
            "Browse decoded"
        );
        Ok(BrowseResult {
            number_returned,
            total_matches,
            raw_xml: return_raw.then(|| didl_xml.to_string()),
            containers: didl.containers,
            items: didl.items,
        })
    }

    /// Children of an object plus its own metadata in one composite.
    /// The metadata browse must return exactly one entry.
    pub fn browse_object_id(
        &self,
        object_id: &str,
        start_index: u32,
        count: u32,
    ) -> Result<ObjectBrowse, ControlPointError> {
        let children = self.browse_content(
            object_id,
            BrowseMode::Children,
            false,
            &BrowseOverrides {
                starting_index: Some(start_index),
                requested_count: Some(count),
                ..BrowseOverrides::default()
            },
        )?;

        let metadata = self.browse_content(
            object_id,
            BrowseMode::Metadata,
            false,
            &BrowseOverrides::default(),
        )?;
        if metadata.number_returned != "1" {
            return Err(ControlPointError::MetadataCountMismatch(
                object_id.to_string(),
            ));
        }

        Ok(ObjectBrowse { children, metadata })
    }

    /// Every item below `object_id`, flattened. Containers whose title is
    /// in `excluded_titles` are skipped together with their subtrees.
    pub fn browse_all_children(
        &self,
        object_id: &str,
        excluded_titles: &[String],
    ) -> Result<Vec<MediaObjectRecord>, ControlPointError> {
        self.collect_descendants(object_id, excluded_titles, &|item: &Item| {
            MediaObjectRecord::from(item)
        })
    }

    /// Same traversal as [`Self::browse_all_children`], collecting only
    /// object ids.
    pub fn browse_all_child_ids(
        &self,
        object_id: &str,
        excluded_titles: &[String],
    ) -> Result<Vec<String>, ControlPointError> {
        self.collect_descendants(object_id, excluded_titles, &|item: &Item| item.id.clone())
    }

    /// Recursive concurrent walk: direct items are projected in place, each
    /// non-excluded child container gets its own scoped thread, and all
    /// branches are joined before returning. Order of the flattened list is
    /// unspecified across branches.
    fn collect_descendants<T: Send>(
        &self,
        object_id: &str,
        excluded_titles: &[String],
        project: &(dyn Fn(&Item) -> T + Sync),
    ) -> Result<Vec<T>, ControlPointError> {
        let page = self.browse_children_paged(object_id)?;

        let mut collected: Vec<T> = page.items.iter().map(project).collect();
        let child_containers: Vec<ContainerNode> = page
            .containers
            .iter()
            .filter(|container| !excluded_titles.contains(&container.title))
            .map(ContainerNode::from)
            .collect();

        let branches = thread::scope(|scope| {
            let handles: Vec<_> = child_containers
                .iter()
                .map(|node| {
                    scope.spawn(move || {
                        self.collect_descendants(&node.id, excluded_titles, project)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect::<Result<Vec<Vec<T>>, ControlPointError>>()
        })?;

        for mut branch in branches {
            collected.append(&mut branch);
        }
        Ok(collected)
    }

    /// Browses direct children, following the device's pagination until
    /// every match has been fetched.
    fn browse_children_paged(&self, object_id: &str) -> Result<BrowseResult, ControlPointError> {
        let mut fetched = 0u32;
        let mut accumulated = BrowseResult::default();

        loop {
            let page = self.browse_content(
                object_id,
                BrowseMode::Children,
                false,
                &BrowseOverrides {
                    starting_index: Some(fetched),
                    ..BrowseOverrides::default()
                },
            )?;

            let returned: u32 = page.number_returned.parse().map_err(|_| {
                ControlPointError::malformed("NumberReturned is not numeric")
            })?;
            let total: u32 = page.total_matches.parse().map_err(|_| {
                ControlPointError::malformed("TotalMatches is not numeric")
            })?;

            accumulated.containers.extend(page.containers);
            accumulated.items.extend(page.items);
            fetched += returned;

            if returned == 0 || fetched >= total {
                accumulated.number_returned = fetched.to_string();
                accumulated.total_matches = total.to_string();
                return Ok(accumulated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::client::ActionResponse;

    const DIDL_OPEN: &str = concat!(
        "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\" ",
        "xmlns:dc=\"http://purl.org/dc/elements/1.1/\" ",
        "xmlns:upnp=\"urn:schemas-upnp-org:metadata-1-0/upnp/\">"
    );

    fn container(id: &str, title: &str) -> String {
        format!("<container id=\"{id}\"><dc:title>{title}</dc:title></container>")
    }

    fn item(id: &str, title: &str) -> String {
        format!(
            "<item id=\"{id}\"><dc:title>{title}</dc:title>\
             <res>http://media/{id}.mp3</res></item>"
        )
    }

    /// Serves a canned tree keyed by (ObjectID, BrowseFlag).
    struct TreeInvoker {
        pages: HashMap<(String, String), (String, String, String)>,
        calls: AtomicUsize,
    }

    impl TreeInvoker {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_children(mut self, object_id: &str, entries: &[String]) -> Self {
            let count = entries.len().to_string();
            let body = format!("{DIDL_OPEN}{}</DIDL-Lite>", entries.concat());
            self.pages.insert(
                (object_id.to_string(), "BrowseDirectChildren".to_string()),
                (count.clone(), count, body),
            );
            self
        }

        fn with_metadata(mut self, object_id: &str, entries: &[String]) -> Self {
            let count = entries.len().to_string();
            let body = format!("{DIDL_OPEN}{}</DIDL-Lite>", entries.concat());
            self.pages.insert(
                (object_id.to_string(), "BrowseMetadata".to_string()),
                (count.clone(), count, body),
            );
            self
        }
    }

    impl ActionInvoker for TreeInvoker {
        fn invoke_action(
            &self,
            action: &str,
            args: &[(&str, &str)],
            _service_type: &str,
        ) -> anyhow::Result<ActionResponse> {
            assert_eq!(action, "Browse");
            self.calls.fetch_add(1, Ordering::SeqCst);

            let get = |name: &str| {
                args.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
                    .unwrap()
            };
            let key = (get("ObjectID"), get("BrowseFlag"));
            let (returned, total, body) = self
                .pages
                .get(&key)
                .cloned()
                .unwrap_or(("0".to_string(), "0".to_string(), String::new()));

            Ok([
                ("NumberReturned".to_string(), returned),
                ("TotalMatches".to_string(), total),
                ("Result".to_string(), body),
            ]
            .into_iter()
            .collect())
        }
    }

    fn three_item_tree() -> TreeInvoker {
        TreeInvoker::new()
            .with_children("0", &[container("A", "A"), container("B", "B")])
            .with_children("A", &[item("a1", "First")])
            .with_children("B", &[item("b1", "Second"), item("b2", "Third")])
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = "everything".parse::<BrowseMode>().unwrap_err();
        assert!(matches!(err, ControlPointError::UnknownBrowseType(_)));
    }

    #[test]
    fn zero_returned_skips_decode() {
        let invoker = Arc::new(TreeInvoker::new().with_children("empty", &[]));
        let browser = ContentBrowser::new(Arc::clone(&invoker) as Arc<dyn ActionInvoker>);

        let result = browser
            .browse_content("empty", BrowseMode::Children, true, &BrowseOverrides::default())
            .unwrap();
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.number_returned, "0");
        assert_eq!(result.total_matches, "0");
        // the raw fragment still comes along when asked for
        assert!(result.raw_xml.is_some_and(|xml| xml.contains("DIDL-Lite")));
        assert!(result.items.is_empty() && result.containers.is_empty());
    }

    #[test]
    fn missing_counter_is_malformed() {
        struct Bare;
        impl ActionInvoker for Bare {
            fn invoke_action(
                &self,
                _action: &str,
                _args: &[(&str, &str)],
                _service_type: &str,
            ) -> anyhow::Result<ActionResponse> {
                Ok([("Result".to_string(), String::new())].into_iter().collect())
            }
        }

        let browser = ContentBrowser::new(Arc::new(Bare));
        let err = browser
            .browse_content("0", BrowseMode::Children, false, &BrowseOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ControlPointError::MalformedResponse(_)));
    }

    #[test]
    fn browse_all_children_flattens_tree() {
        let browser = ContentBrowser::new(Arc::new(three_item_tree()));

        let mut names: Vec<String> = browser
            .browse_all_children("0", &[])
            .unwrap()
            .into_iter()
            .map(|record| record.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn excluded_container_is_pruned() {
        let browser = ContentBrowser::new(Arc::new(three_item_tree()));

        let records = browser
            .browse_all_children("0", &["B".to_string()])
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a1");
    }

    #[test]
    fn ids_only_traversal() {
        let browser = ContentBrowser::new(Arc::new(three_item_tree()));

        let mut ids = browser.browse_all_child_ids("0", &[]).unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a1", "b1", "b2"]);
    }

    #[test]
    fn failing_branch_fails_aggregate() {
        // "B" has no page registered but a non-zero counter forces a parse
        // of an empty body.
        struct HalfBroken(TreeInvoker);
        impl ActionInvoker for HalfBroken {
            fn invoke_action(
                &self,
                action: &str,
                args: &[(&str, &str)],
                service_type: &str,
            ) -> anyhow::Result<ActionResponse> {
                let object_id = args
                    .iter()
                    .find(|(key, _)| *key == "ObjectID")
                    .map(|(_, value)| *value)
                    .unwrap();
                if object_id == "B" {
                    anyhow::bail!("device fault 501");
                }
                self.0.invoke_action(action, args, service_type)
            }
        }

        let browser = ContentBrowser::new(Arc::new(HalfBroken(three_item_tree())));
        let err = browser.browse_all_children("0", &[]).unwrap_err();
        assert!(matches!(err, ControlPointError::Transport(_)));
    }

    #[test]
    fn object_browse_requires_single_metadata_entry() {
        let invoker = TreeInvoker::new()
            .with_children("A", &[item("a1", "First")])
            .with_metadata("A", &[container("A", "A"), container("A2", "A2")]);
        let browser = ContentBrowser::new(Arc::new(invoker));

        let err = browser.browse_object_id("A", 0, 0).unwrap_err();
        assert!(matches!(err, ControlPointError::MetadataCountMismatch(_)));
    }

    #[test]
    fn object_browse_merges_children_and_metadata() {
        let invoker = TreeInvoker::new()
            .with_children("A", &[item("a1", "First")])
            .with_metadata("A", &[container("A", "A")]);
        let browser = ContentBrowser::new(Arc::new(invoker));

        let result = browser.browse_object_id("A", 0, 0).unwrap();
        assert_eq!(result.children.items.len(), 1);
        assert_eq!(result.metadata.containers[0].title, "A");
    }
}
