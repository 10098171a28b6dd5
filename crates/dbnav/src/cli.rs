use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use dbnav_core::{
    CancelToken, FilterScope, JsonPreferenceStore, MemoryPreferenceStore, NavError,
    NavigatorModel, Node, NodeFilter, NodePath, PreferenceStore, SortPolicy,
};

use crate::forest::JsonForest;

const USAGE: &str = "\
usage: dbnav <forest.json> [options]

options:
  --prefs <file>                     preference file (default: user config dir)
  --memory-prefs                     do not read or write preferences
  --depth <n>                        levels to expand (default: 2)
  --from <path>                      start at this node instead of the root
  --filter <path>=<incl>[:<excl>]    set a name filter, patterns separated by ';'
  --no-sort                          keep the order of the forest file
  --show-system                      show system objects";

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub forest: PathBuf,
    pub prefs: Option<PathBuf>,
    pub memory_prefs: bool,
    pub depth: usize,
    pub from: Option<String>,
    pub filters: Vec<(NodePath, NodeFilter)>,
    pub no_sort: bool,
    pub show_system: bool,
}

pub fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut forest = None;
    let mut options = Options {
        forest: PathBuf::new(),
        prefs: None,
        memory_prefs: false,
        depth: 2,
        from: None,
        filters: Vec::new(),
        no_sort: false,
        show_system: false,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("missing value for {}", name))
        };

        match arg.as_str() {
            "--prefs" => options.prefs = Some(PathBuf::from(value("--prefs")?)),
            "--memory-prefs" => options.memory_prefs = true,
            "--depth" => {
                let raw = value("--depth")?;
                options.depth = raw
                    .parse()
                    .map_err(|_| format!("invalid depth: {}", raw))?;
            }
            "--from" => options.from = Some(value("--from")?),
            "--filter" => options.filters.push(parse_filter(&value("--filter")?)?),
            "--no-sort" => options.no_sort = true,
            "--show-system" => options.show_system = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown option: {}", flag)),
            path if forest.is_none() => forest = Some(PathBuf::from(path)),
            extra => return Err(format!("unexpected argument: {}", extra)),
        }
    }

    options.forest = forest.ok_or_else(|| USAGE.to_string())?;
    Ok(options)
}

/// Parses `path=include[:exclude]`.
fn parse_filter(raw: &str) -> Result<(NodePath, NodeFilter), String> {
    let (path, patterns) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid filter {:?}, expected <path>=<patterns>", raw))?;

    let container: NodePath = path.parse().map_err(|e| format!("{}", e))?;
    let (include, exclude) = patterns.split_once(':').unwrap_or((patterns, ""));

    Ok((
        container,
        NodeFilter::new(
            NodeFilter::split_patterns(include),
            NodeFilter::split_patterns(exclude),
        ),
    ))
}

pub fn run(args: &[String]) -> i32 {
    let options = match parse_args(args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            return 2;
        }
    };

    match execute(&options) {
        Ok(tree) => {
            print!("{}", tree);
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

fn open_preferences(options: &Options) -> Result<Arc<dyn PreferenceStore>, NavError> {
    if options.memory_prefs {
        return Ok(Arc::new(MemoryPreferenceStore::new()));
    }

    let store = match &options.prefs {
        Some(path) => JsonPreferenceStore::from_path(path.clone())?,
        None => JsonPreferenceStore::new()?,
    };
    Ok(Arc::new(store))
}

pub fn execute(options: &Options) -> Result<String, Box<dyn std::error::Error>> {
    let forest = JsonForest::from_file(&options.forest)?;
    log::info!(
        "Read {} containers from {}",
        forest.container_count(),
        options.forest.display()
    );

    let model = NavigatorModel::builder()
        .fallback_source(Arc::new(forest))
        .preferences(open_preferences(options)?)
        .build();

    for (container, filter) in &options.filters {
        model.set_filter(FilterScope::all(container.clone()), filter.clone())?;
    }
    if options.no_sort {
        model.set_sort_policy(SortPolicy::SOURCE_ORDER)?;
    }
    if options.show_system {
        model.set_show_system_objects(true)?;
    }

    let cancel = CancelToken::new();
    let start = match &options.from {
        Some(path) => model.find_node_by_path(path, &cancel)?,
        None => model.root(),
    };

    let tree = render_tree(&model, &start, options.depth, &cancel)?;
    model.dispose();
    Ok(tree)
}

/// Renders `start` and its descendants down to `depth` levels, one node per line.
pub fn render_tree(
    model: &NavigatorModel,
    start: &Arc<Node>,
    depth: usize,
    cancel: &CancelToken,
) -> Result<String, NavError> {
    let mut out = String::new();
    // The root has no line of its own, so its children start unindented.
    let offset = usize::from(start.is_root());
    let mut stack = vec![(start.clone(), 0usize)];

    while let Some((node, level)) = stack.pop() {
        if !node.is_root() {
            let _ = write!(
                out,
                "{}{} [{}]",
                "  ".repeat(level.saturating_sub(offset)),
                node.name(),
                node.kind().label()
            );
        }

        let expand = level < depth && node.is_container();
        let children = if expand {
            match model.get_children(&node, cancel) {
                Ok(children) => children,
                Err(NavError::LoadFailed { message, .. }) => {
                    let _ = writeln!(out, " (error: {})", message);
                    continue;
                }
                Err(e) => return Err(e),
            }
        } else {
            Vec::new()
        };

        if !node.is_root() {
            let marker = if expand && node.is_filtered() {
                " (filtered)"
            } else {
                ""
            };
            let _ = writeln!(out, "{}", marker);
        }

        stack.extend(children.into_iter().rev().map(|child| (child, level + 1)));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("dbnav")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parses_filters_and_flags() {
        let options = parse_args(&args(&[
            "forest.json",
            "--depth",
            "4",
            "--filter",
            "Main/pg=pub*;app*:*_tmp",
            "--no-sort",
            "--memory-prefs",
        ]))
        .expect("valid arguments");

        assert_eq!(options.forest, PathBuf::from("forest.json"));
        assert_eq!(options.depth, 4);
        assert!(options.no_sort);
        assert!(options.memory_prefs);
        assert_eq!(
            options.filters,
            vec![(
                NodePath::from_segments(["Main", "pg"]),
                NodeFilter::new(["pub*", "app*"], ["*_tmp"])
            )]
        );
    }

    #[test]
    fn rejects_missing_forest_and_unknown_flags() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["f.json", "--bogus"])).is_err());
        assert!(parse_args(&args(&["f.json", "--depth"])).is_err());
        assert!(parse_args(&args(&["f.json", "--filter", "nopatterns"])).is_err());
    }

    #[test]
    fn renders_sample_forest() {
        let fixture = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/sample_forest.json");
        let options = Options {
            forest: PathBuf::from(fixture),
            prefs: None,
            memory_prefs: true,
            depth: 3,
            from: None,
            filters: Vec::new(),
            no_sort: false,
            show_system: false,
        };

        let tree = execute(&options).expect("tree renders");
        assert_eq!(
            tree,
            "\
Main [project]
  Local [folder]
    mysql [datasource]
  pg [datasource]
    public [container]
  scripts [resource-folder]
    init.sql [resource]
    seed.sql [resource]
"
        );
    }

    #[test]
    fn filter_option_trims_a_container() {
        let fixture = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/sample_forest.json");
        let options = Options {
            forest: PathBuf::from(fixture),
            prefs: None,
            memory_prefs: true,
            depth: 3,
            from: Some("Main/scripts".to_string()),
            filters: vec![(
                NodePath::from_segments(["Main", "scripts"]),
                NodeFilter::new(["init*"], Vec::<String>::new()),
            )],
            no_sort: false,
            show_system: false,
        };

        let tree = execute(&options).expect("tree renders");
        assert_eq!(tree, "scripts [resource-folder] (filtered)\n  init.sql [resource]\n");
    }

    #[test]
    fn json_preferences_keep_filters_between_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fixture = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/sample_forest.json");
        let mut options = Options {
            forest: PathBuf::from(fixture),
            prefs: Some(dir.path().join("navigator.json")),
            memory_prefs: false,
            depth: 3,
            from: Some("Main/scripts".to_string()),
            filters: vec![(
                NodePath::from_segments(["Main", "scripts"]),
                NodeFilter::new(["seed*"], Vec::<String>::new()),
            )],
            no_sort: false,
            show_system: false,
        };
        execute(&options).expect("first run");

        options.filters.clear();
        let tree = execute(&options).expect("second run");
        assert!(tree.contains("seed.sql"));
        assert!(!tree.contains("init.sql"));
    }
}
