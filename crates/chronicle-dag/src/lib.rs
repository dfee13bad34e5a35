//! Builds the parent/child adjacency over a session's records, classifies
//! threads (main / side / orphaned), flags orphans, and scores corruption.
//! The graph is an arena keyed by `uuid`: edges are id pairs, never owning
//! pointers, so the structure stays cycle-tolerant to build and trivially
//! serializable.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use chronicle_core::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadTag {
    Main,
    Side,
    Orphaned,
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub tag: ThreadTag,
    pub root: String,
    pub members: Vec<String>,
}

/// Topology computed over a session's records. Built once per scan; the
/// repair engine re-derives one from a hypothetical parents map to validate
/// a proposal without mutating the live graph.
#[derive(Debug, Clone, Default)]
pub struct ConversationDag {
    pub children: HashMap<String, Vec<String>>,
    pub parents: HashMap<String, Option<String>>,
    pub roots: Vec<String>,
    pub threads: Vec<Thread>,
    timestamps: HashMap<String, DateTime<Utc>>,
}

impl ConversationDag {
    /// Builds the graph from `records` and writes `is_orphan` /
    /// `corruption_score` back onto each record in place.
    pub fn build(records: &mut [Record]) -> Self {
        let timestamps: HashMap<String, DateTime<Utc>> = records
            .iter()
            .map(|record| (record.uuid.clone(), record.timestamp))
            .collect();

        let mut parents: HashMap<String, Option<String>> = HashMap::new();
        for record in records.iter() {
            parents.insert(record.uuid.clone(), record.parent_uuid.clone());
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for record in records.iter() {
            if let Some(parent_uuid) = &record.parent_uuid {
                if parents.contains_key(parent_uuid) {
                    children.entry(parent_uuid.clone()).or_default().push(record.uuid.clone());
                }
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| {
                timestamps[a].cmp(&timestamps[b]).then_with(|| a.cmp(b))
            });
        }

        let gap_p95 = percentile_95_gap(records, &parents, &timestamps);

        for record in records.iter_mut() {
            let is_orphan = record
                .parent_uuid
                .as_ref()
                .is_some_and(|parent| !parents.contains_key(parent));
            record.is_orphan = is_orphan;
        }
        let orphan_uuids: HashSet<String> = records
            .iter()
            .filter(|record| record.is_orphan)
            .map(|record| record.uuid.clone())
            .collect();

        for record in records.iter_mut() {
            let mut score = 0.0_f64;
            if record.is_orphan {
                score += 0.5;
            }
            if let Some(parent) = &record.parent_uuid {
                if orphan_uuids.contains(parent) {
                    score += 0.3;
                }
                if let (Some(parent_ts), child_ts) = (timestamps.get(parent), record.timestamp) {
                    let gap = (child_ts - *parent_ts).num_milliseconds();
                    if gap > gap_p95 {
                        score += 0.2;
                    }
                }
            }
            record.corruption_score = score.clamp(0.0, 1.0);
        }

        let mut roots: Vec<String> = records
            .iter()
            .filter(|record| record.parent_uuid.is_none() || record.is_orphan)
            .map(|record| record.uuid.clone())
            .collect();
        roots.sort_by(|a, b| timestamps[a].cmp(&timestamps[b]).then_with(|| a.cmp(b)));

        let threads = build_threads(&roots, &children, &timestamps, &orphan_uuids);

        Self {
            children,
            parents,
            roots,
            threads,
            timestamps,
        }
    }

    pub fn thread_tag_of(&self, uuid: &str) -> Option<ThreadTag> {
        self.thread_of(uuid).map(|thread| thread.tag)
    }

    /// The thread a uuid belongs to, if any. Unlike [`Self::thread_tag_of`]
    /// this exposes thread identity (via `root`), so callers can tell two
    /// `Side` members apart rather than only knowing they're both `Side`.
    pub fn thread_of(&self, uuid: &str) -> Option<&Thread> {
        self.threads
            .iter()
            .find(|thread| thread.members.iter().any(|member| member == uuid))
    }

    /// Records that are nobody's parent, oldest first.
    pub fn branch_tips(&self) -> Vec<String> {
        let mut tips: Vec<String> = self
            .parents
            .keys()
            .filter(|uuid| !self.children.contains_key(*uuid))
            .cloned()
            .collect();
        tips.sort_by(|a, b| self.timestamps[a].cmp(&self.timestamps[b]).then_with(|| a.cmp(b)));
        tips
    }

    /// Whether `from` can reach `to` by walking child edges, i.e. whether
    /// making `to`'s parent `from` would introduce a cycle.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            if let Some(kids) = self.children.get(&node) {
                stack.extend(kids.iter().cloned());
            }
        }
        false
    }

    /// DFS grey/black cycle detection from every root; returns the uuids
    /// involved in each back-edge found. Not run implicitly on every
    /// build — callers invoke this only when re-checking after a proposed
    /// repair.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Grey,
            Black,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut cycles = Vec::new();

        fn visit<'a>(
            node: &'a str,
            children: &'a HashMap<String, Vec<String>>,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            match marks.get(node) {
                Some(Mark::Black) => return,
                Some(Mark::Grey) => {
                    let start = path.iter().position(|n| *n == node).unwrap_or(0);
                    cycles.push(path[start..].iter().map(|s| s.to_string()).collect());
                    return;
                }
                None => {}
            }
            marks.insert(node, Mark::Grey);
            path.push(node);
            if let Some(kids) = children.get(node) {
                for child in kids {
                    visit(child.as_str(), children, marks, path, cycles);
                }
            }
            path.pop();
            marks.insert(node, Mark::Black);
        }

        for root in self.parents.keys() {
            visit(root.as_str(), &self.children, &mut marks, &mut Vec::new(), &mut cycles);
        }
        cycles
    }
}

fn percentile_95_gap(
    records: &[Record],
    parents: &HashMap<String, Option<String>>,
    timestamps: &HashMap<String, DateTime<Utc>>,
) -> i64 {
    let mut gaps: Vec<i64> = records
        .iter()
        .filter_map(|record| {
            let parent_uuid = parents.get(&record.uuid)?.as_ref()?;
            let parent_ts = timestamps.get(parent_uuid)?;
            Some((record.timestamp - *parent_ts).num_milliseconds())
        })
        .filter(|gap| *gap >= 0)
        .collect();
    if gaps.is_empty() {
        return 60_000;
    }
    gaps.sort_unstable();
    let index = ((gaps.len() as f64) * 0.95).ceil() as usize;
    let index = index.saturating_sub(1).min(gaps.len() - 1);
    gaps[index].max(60_000)
}

fn build_threads(
    roots: &[String],
    children: &HashMap<String, Vec<String>>,
    timestamps: &HashMap<String, DateTime<Utc>>,
    orphan_uuids: &HashSet<String>,
) -> Vec<Thread> {
    let main_root = roots.iter().find(|root| !orphan_uuids.contains(*root)).cloned();

    let main_path: HashSet<String> = main_root
        .as_ref()
        .map(|root| longest_path(root, children, timestamps).into_iter().collect())
        .unwrap_or_default();

    let mut threads = Vec::new();
    let mut claimed: HashSet<String> = HashSet::new();

    if let Some(root) = &main_root {
        threads.push(Thread {
            tag: ThreadTag::Main,
            root: root.clone(),
            members: main_path.iter().cloned().collect(),
        });
        claimed.extend(main_path.iter().cloned());
    }

    for root in roots {
        let subtree = descendants(root, children);
        let unclaimed: Vec<String> = subtree.into_iter().filter(|uuid| !claimed.contains(uuid)).collect();
        if unclaimed.is_empty() {
            continue;
        }
        claimed.extend(unclaimed.iter().cloned());
        let tag = if orphan_uuids.contains(root) {
            ThreadTag::Orphaned
        } else {
            ThreadTag::Side
        };
        threads.push(Thread {
            tag,
            root: root.clone(),
            members: unclaimed,
        });
    }

    threads
}

fn descendants(root: &str, children: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut out = vec![root.to_string()];
    let mut visited: HashSet<String> = out.iter().cloned().collect();
    let mut stack = vec![root.to_string()];
    while let Some(node) = stack.pop() {
        if let Some(kids) = children.get(&node) {
            for kid in kids {
                if visited.insert(kid.clone()) {
                    out.push(kid.clone());
                    stack.push(kid.clone());
                }
            }
        }
    }
    out
}

/// Longest root-to-leaf walk, ties broken by oldest-child timestamp at
/// every branch. Guards against cycles with a visited set so a corrupted
/// graph can't recurse forever.
fn longest_path(
    root: &str,
    children: &HashMap<String, Vec<String>>,
    timestamps: &HashMap<String, DateTime<Utc>>,
) -> Vec<String> {
    let mut path = vec![root.to_string()];
    let mut visited: HashSet<String> = path.iter().cloned().collect();
    let mut current = root.to_string();

    loop {
        let Some(kids) = children.get(&current) else { break };
        let mut best: Option<(&String, usize)> = None;
        for kid in kids {
            if visited.contains(kid) {
                continue;
            }
            let depth = subtree_depth(kid, children, &visited);
            let better = match best {
                None => true,
                Some((best_kid, best_depth)) => {
                    depth > best_depth
                        || (depth == best_depth && timestamps.get(kid) < timestamps.get(best_kid))
                }
            };
            if better {
                best = Some((kid, depth));
            }
        }
        match best {
            Some((kid, _)) => {
                current = kid.clone();
                visited.insert(current.clone());
                path.push(current.clone());
            }
            None => break,
        }
    }

    path
}

fn subtree_depth(node: &str, children: &HashMap<String, Vec<String>>, visited: &HashSet<String>) -> usize {
    let mut depth = 0;
    let mut stack = vec![(node.to_string(), 0usize)];
    let mut local_visited = visited.clone();
    local_visited.insert(node.to_string());
    while let Some((current, current_depth)) = stack.pop() {
        depth = depth.max(current_depth);
        if let Some(kids) = children.get(&current) {
            for kid in kids {
                if local_visited.insert(kid.clone()) {
                    stack.push((kid.clone(), current_depth + 1));
                }
            }
        }
    }
    depth
}
