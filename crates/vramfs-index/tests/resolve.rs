use proptest::prelude::*;
use vramfs_index::{EntryFilter, EntryId, IndexError, IndexStore, ROOT_ENTRY};

#[test]
fn fresh_index_resolves_root() {
    let store = IndexStore::create().unwrap();
    let index = store.connect().unwrap();
    assert_eq!(index.find("/", EntryFilter::All).unwrap(), EntryId(ROOT_ENTRY));
    assert!(index.children(EntryId::ROOT).unwrap().is_empty());
}

#[test]
fn child_of_directory_resolves_and_sibling_does_not() {
    let store = IndexStore::create().unwrap();
    let index = store.connect().unwrap();
    let dir = index.insert_entry(EntryId::ROOT, "D", true).unwrap();
    let file = index.insert_entry(dir, "N", false).unwrap();

    assert_eq!(index.find("/D/N", EntryFilter::All).unwrap(), file);
    assert_eq!(index.find("/D/N", EntryFilter::File).unwrap(), file);
    assert!(matches!(
        index.find("/D/M", EntryFilter::All),
        Err(IndexError::NotFound)
    ));
}

#[test]
fn file_in_the_middle_of_a_path_is_not_a_directory() {
    let store = IndexStore::create().unwrap();
    let index = store.connect().unwrap();
    index.insert_path("/f", false).unwrap();
    index.insert_path("/d", true).unwrap();
    index.insert_path("/d/f", false).unwrap();

    for path in ["/f/x", "/f/x/y", "/d/f/anything", "/d/f/f"] {
        assert!(
            matches!(index.find(path, EntryFilter::All), Err(IndexError::NotADirectory)),
            "{path}"
        );
    }
}

#[test]
fn attributes_report_parent_and_defaults() {
    let store = IndexStore::create().unwrap();
    let index = store.connect().unwrap();
    let dir = index.insert_path("/music", true).unwrap();
    let file = index.insert_path("/music/track.flac", false).unwrap();

    let attrs = index.attributes(file).unwrap();
    assert_eq!(attrs.parent, dir);
    assert_eq!(attrs.name, "track.flac");
    assert!(!attrs.is_directory);
    assert_eq!(attrs.size, vramfs_index::DEFAULT_ENTRY_SIZE);
    assert_eq!(attrs.atime, attrs.ctime);

    assert!(matches!(
        index.attributes(EntryId(12345)),
        Err(IndexError::NotFound)
    ));
}

#[derive(Debug, Clone)]
struct Node {
    parent: usize,
    name: String,
    is_directory: bool,
}

fn tree_strategy() -> impl Strategy<Value = Vec<Node>> {
    proptest::collection::vec(
        (any::<usize>(), "[a-c]{1,2}", any::<bool>()).prop_map(|(parent, name, is_directory)| {
            Node {
                parent,
                name,
                is_directory,
            }
        }),
        1..24,
    )
}

proptest! {
    #[test]
    fn every_inserted_path_resolves_to_its_id(nodes in tree_strategy()) {
        let store = IndexStore::create().unwrap();
        let index = store.connect().unwrap();

        // (path, id, is_directory); slot 0 is the root.
        let mut inserted: Vec<(String, EntryId, bool)> = vec![(String::new(), EntryId::ROOT, true)];
        for node in nodes {
            let dirs: Vec<usize> = (0..inserted.len()).filter(|&i| inserted[i].2).collect();
            let (parent_path, parent_id, _) = inserted[dirs[node.parent % dirs.len()]].clone();
            let path = format!("{parent_path}/{}", node.name);

            match index.insert_entry(parent_id, &node.name, node.is_directory) {
                Ok(id) => inserted.push((path, id, node.is_directory)),
                Err(IndexError::AlreadyExists) => {
                    prop_assert!(inserted.iter().any(|(p, _, _)| *p == path));
                }
                Err(err) => return Err(TestCaseError::fail(err.to_string())),
            }
        }

        for (path, id, is_directory) in &inserted[1..] {
            prop_assert_eq!(index.find(path, EntryFilter::All).unwrap(), *id);
            let children = index.children(*id).unwrap();
            if *is_directory {
                prop_assert_eq!(index.find(path, EntryFilter::Directory).unwrap(), *id);
            } else {
                prop_assert!(children.is_empty());
                let below = format!("{path}/a");
                prop_assert!(matches!(
                    index.find(&below, EntryFilter::All),
                    Err(IndexError::NotADirectory)
                ));
            }
        }
    }
}
