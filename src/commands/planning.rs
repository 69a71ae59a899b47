//! Epic and release commands.

use chrono::Utc;
use serde::Serialize;

use super::{Output, json};
use crate::models::ops::{self, Created};
use crate::models::{Epic, Release};
use crate::storage::{Storage, ids};
use crate::Result;

#[derive(Serialize)]
pub struct EpicCreated {
    pub id: String,
    pub title: String,
}

impl Output for EpicCreated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Created epic {} \"{}\"", self.id, self.title)
    }
}

pub fn epic_add(
    storage: &Storage,
    prefix: &str,
    title: &str,
    description: Option<String>,
) -> Result<EpicCreated> {
    let Created { id, .. } =
        storage.update(|doc| ops::create_epic(doc, prefix, title, description, Utc::now()))?;
    Ok(EpicCreated {
        id,
        title: title.trim().to_string(),
    })
}

#[derive(Serialize)]
pub struct EpicSummary {
    #[serde(flatten)]
    pub epic: Epic,
    /// Items filed under this epic
    pub items: Vec<String>,
}

#[derive(Serialize)]
pub struct EpicList {
    pub epics: Vec<EpicSummary>,
    pub count: usize,
}

impl Output for EpicList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.epics.is_empty() {
            return "No epics.".to_string();
        }
        let mut lines: Vec<String> = self
            .epics
            .iter()
            .map(|e| format!("{} {} ({} item(s))", e.epic.id, e.epic.title, e.items.len()))
            .collect();
        lines.push(format!("{} epic(s)", self.count));
        lines.join("\n")
    }
}

pub fn epic_list(storage: &Storage) -> Result<EpicList> {
    let epics: Vec<EpicSummary> = storage.read(|doc| {
        doc.epics
            .iter()
            .map(|epic| EpicSummary {
                items: doc
                    .items
                    .iter()
                    .filter(|i| i.epic.as_deref() == Some(epic.id.as_str()))
                    .map(|i| i.entry.id.clone())
                    .collect(),
                epic: epic.clone(),
            })
            .collect()
    })?;
    Ok(EpicList {
        count: epics.len(),
        epics,
    })
}

#[derive(Serialize)]
pub struct ReleaseCreated {
    pub name: String,
    pub items: Vec<String>,
}

impl Output for ReleaseCreated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.items.is_empty() {
            format!("Created release {}", self.name)
        } else {
            format!("Created release {} with {}", self.name, self.items.join(", "))
        }
    }
}

/// Create a release grouping the selected items.
pub fn release_add(
    storage: &Storage,
    prefix: &str,
    name: &str,
    selectors: &[String],
) -> Result<ReleaseCreated> {
    let items = storage.update(|doc| {
        let resolved = selectors
            .iter()
            .map(|s| ids::resolve_selector(doc, prefix, s))
            .collect::<Result<Vec<_>>>()?;
        ops::create_release(doc, name, resolved, Utc::now())?;
        let created = doc.releases.iter().find(|r| r.name == name.trim());
        Ok(created.map(|r| r.items.clone()).unwrap_or_default())
    })?;
    Ok(ReleaseCreated {
        name: name.trim().to_string(),
        items,
    })
}

#[derive(Serialize)]
pub struct ReleaseList {
    pub releases: Vec<Release>,
    pub count: usize,
}

impl Output for ReleaseList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.releases.is_empty() {
            return "No releases.".to_string();
        }
        let mut lines: Vec<String> = self
            .releases
            .iter()
            .map(|r| {
                let items = if r.items.is_empty() {
                    "-".to_string()
                } else {
                    r.items.join(", ")
                };
                format!("{}: {}", r.name, items)
            })
            .collect();
        lines.push(format!("{} release(s)", self.count));
        lines.join("\n")
    }
}

pub fn release_list(storage: &Storage) -> Result<ReleaseList> {
    let releases = storage.read(|doc| doc.releases.clone())?;
    Ok(ReleaseList {
        count: releases.len(),
        releases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{item_add, item_remove};
    use crate::models::ops::NewItem;
    use crate::test_utils::TestEnv;
    use crate::Error;

    fn new_item(title: &str, epic: Option<&str>) -> NewItem {
        NewItem {
            title: title.to_string(),
            epic: epic.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_epic_add_and_list_groups_items() {
        let env = TestEnv::new();
        let storage = env.init_storage();

        let epic = epic_add(&storage, "PLAT", "Auth rewrite", None).unwrap();
        assert_eq!(epic.id, "PLAT-E001");
        item_add(&storage, "PLAT", new_item("Login", Some(&epic.id))).unwrap();
        item_add(&storage, "PLAT", new_item("Unrelated", None)).unwrap();

        let list = epic_list(&storage).unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.epics[0].items, vec!["PLAT-0001".to_string()]);
        assert!(list.to_json().contains("\"title\":\"Auth rewrite\""));
    }

    #[test]
    fn test_release_add_resolves_selectors() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        item_add(&storage, "PLAT", new_item("A", None)).unwrap();
        item_add(&storage, "PLAT", new_item("B", None)).unwrap();

        let release = release_add(
            &storage,
            "PLAT",
            "v1.0",
            &["1".to_string(), "PLAT-0002".to_string(), "1".to_string()],
        )
        .unwrap();
        assert_eq!(release.items, vec!["PLAT-0001", "PLAT-0002"]);

        let dup = release_add(&storage, "PLAT", "v1.0", &[]);
        assert!(matches!(dup, Err(Error::Precondition { .. })));
    }

    #[test]
    fn test_release_unknown_item_rejected() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        assert!(release_add(&storage, "PLAT", "v1", &["PLAT-0042".to_string()]).is_err());
        assert_eq!(release_list(&storage).unwrap().count, 0);
    }

    #[test]
    fn test_removed_item_leaves_release() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        item_add(&storage, "PLAT", new_item("A", None)).unwrap();
        release_add(&storage, "PLAT", "v1", &["1".to_string()]).unwrap();

        item_remove(&storage, "PLAT", "1").unwrap();
        let list = release_list(&storage).unwrap();
        assert!(list.releases[0].items.is_empty());
    }
}
