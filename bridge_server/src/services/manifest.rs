//! Build-manifest discovery and transformation.
//!
//! Manifests are untyped YAML documents. Only the keys the bridge touches
//! (`sources`, `environment`) have their shapes checked; a wrong shape is
//! the manifest author's mistake and is reported as such.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_yaml::{Mapping, Value};

use crate::models::error::BridgeError;
use crate::services::github_service::GithubClient;

/// Conventional manifest directory and default path.
pub const MANIFEST_DIR: &str = ".builds";
pub const DEFAULT_MANIFEST_PATH: &str = ".build.yml";

/// Environment marker identifying jobs submitted by the bridge.
pub const SUBMITTER_ENV_KEY: &str = "BUILD_SUBMITTER";
pub const SUBMITTER_NAME: &str = "buildbridge";

/// Upper bound on jobs per check suite.
pub const MAX_JOBS_PER_CHECK_SUITE: usize = 4;

/// List candidate manifest paths at a commit: every `*.yml` file in the
/// conventional directory, or the single default path when the directory
/// does not exist.
pub async fn list_candidates(
    github: &GithubClient,
    installation_id: i64,
    owner: &str,
    repo: &str,
    git_ref: &str,
) -> Result<Vec<String>, BridgeError> {
    let entries = match github
        .list_dir(installation_id, owner, repo, MANIFEST_DIR, git_ref)
        .await?
    {
        Some(entries) => entries,
        None => return Ok(vec![DEFAULT_MANIFEST_PATH.to_string()]),
    };

    Ok(entries
        .into_iter()
        .filter(|entry| entry.kind == "file" && entry.name.ends_with(".yml"))
        .map(|entry| entry.path)
        .collect())
}

/// Select at most `cap` candidates, uniformly at random when over the cap.
/// Sampling (rather than taking the first few) keeps every manifest covered
/// over repeated runs.
pub fn select_candidates<R: Rng>(
    mut candidates: Vec<String>,
    cap: usize,
    rng: &mut R,
) -> Vec<String> {
    if candidates.len() > cap {
        candidates.shuffle(rng);
        candidates.truncate(cap);
    }
    candidates
}

/// Fetch and parse one manifest. `None` when the file is absent (a normal
/// outcome, the candidate is skipped); parse failures are user errors.
pub async fn fetch_manifest(
    github: &GithubClient,
    installation_id: i64,
    owner: &str,
    repo: &str,
    git_ref: &str,
    path: &str,
) -> Result<Option<Mapping>, BridgeError> {
    let Some(body) = github
        .fetch_file(installation_id, owner, repo, path, git_ref)
        .await?
    else {
        return Ok(None);
    };

    let doc: Value = serde_yaml::from_str(&body)
        .map_err(|e| BridgeError::user(format!("failed to parse manifest at {path}: {e}")))?;
    match doc {
        Value::Mapping(mapping) => Ok(Some(mapping)),
        _ => Err(BridgeError::user(format!(
            "invalid manifest at {path}: document is not a map"
        ))),
    }
}

fn get_value_mut<'a>(mapping: &'a mut Mapping, key: &str) -> Option<&'a mut Value> {
    mapping
        .iter_mut()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// Rewrite `sources` entries referring to the repository being built so the
/// job fetches the exact head commit rather than a mutable branch head.
///
/// An entry may carry a `#branch` selector; it is stripped for comparison
/// only. An entry counts as "the same repository" when, fragment removed, it
/// ends with `/{name}` or `/{name}.git`. Entries for other repositories are
/// left untouched. The rewrite is idempotent: a pinned entry still matches
/// and rewrites to itself.
pub fn rewrite_sources(
    manifest: &mut Mapping,
    repo_name: &str,
    clone_url: &str,
    head_sha: &str,
) -> Result<(), BridgeError> {
    let Some(sources) = get_value_mut(manifest, "sources") else {
        return Ok(());
    };
    let Value::Sequence(entries) = sources else {
        return Err(BridgeError::user("invalid manifest: `sources` is not a list"));
    };

    let pinned = format!("{clone_url}#{head_sha}");
    let plain_suffix = format!("/{repo_name}");
    let git_suffix = format!("/{repo_name}.git");

    for entry in entries.iter_mut() {
        let src = match entry.as_str() {
            Some(s) => s,
            None => {
                return Err(BridgeError::user(
                    "invalid manifest: `sources` contains a non-string entry",
                ))
            }
        };

        let base = match src.rfind('#') {
            Some(idx) => &src[..idx],
            None => src,
        };

        if base.ends_with(&plain_suffix) || base.ends_with(&git_suffix) {
            *entry = Value::String(pinned.clone());
        }
    }

    Ok(())
}

/// Ensure an `environment` map exists and mark the bridge as submitter, so
/// downstream tooling can tell bridge jobs from manual submissions.
pub fn mark_submitter(manifest: &mut Mapping) -> Result<(), BridgeError> {
    if get_value_mut(manifest, "environment").is_none() {
        manifest.insert(
            Value::String("environment".to_string()),
            Value::Mapping(Mapping::new()),
        );
    }

    let env = match get_value_mut(manifest, "environment") {
        Some(Value::Mapping(env)) => env,
        _ => {
            return Err(BridgeError::user(
                "invalid manifest: `environment` is not a map with string keys",
            ))
        }
    };
    env.insert(
        Value::String(SUBMITTER_ENV_KEY.to_string()),
        Value::String(SUBMITTER_NAME.to_string()),
    );
    Ok(())
}

/// Display name of a manifest: the base filename without extension, or
/// `None` for the conventional default path.
pub fn display_name(path: &str) -> Option<String> {
    if path == DEFAULT_MANIFEST_PATH {
        return None;
    }
    let base = path.rsplit('/').next().unwrap_or(path);
    let name = match base.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => base,
    };
    Some(name.to_string())
}

/// Job tags: base repository name, then the trigger (`pulls`/<pr> or
/// `commits`/<branch>), then the manifest name when not the default.
pub fn job_tags(
    base_repo_name: &str,
    pull_request: Option<u64>,
    head_branch: Option<&str>,
    manifest_name: Option<&str>,
) -> Vec<String> {
    let mut tags = vec![base_repo_name.to_string()];
    if let Some(number) = pull_request {
        tags.push("pulls".to_string());
        tags.push(number.to_string());
    } else if let Some(branch) = head_branch {
        tags.push("commits".to_string());
        tags.push(branch.to_string());
    }
    if let Some(name) = manifest_name {
        tags.push(name.to_string());
    }
    tags
}

/// Markdown note for the job: first message line, short SHA, author, and a
/// reference-style link to the commit page.
pub fn job_note(
    commit_message: &str,
    head_sha: &str,
    author_name: &str,
    repo_html_url: &str,
) -> String {
    let title = commit_message.lines().next().unwrap_or("");
    let short_sha = head_sha.get(..10).unwrap_or(head_sha);
    let commit_url = format!("{repo_html_url}/commit/{head_sha}");
    format!("{title}\n\n[{short_sha}] — {author_name}\n\n[{short_sha}]: {commit_url}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const REPO: &str = "widget";
    const CLONE_URL: &str = "https://github.com/alice/widget.git";
    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn get<'a>(m: &'a Mapping, key: &str) -> Option<&'a Value> {
        m.iter().find(|(k, _)| k.as_str() == Some(key)).map(|(_, v)| v)
    }

    fn manifest(yaml: &str) -> Mapping {
        match serde_yaml::from_str(yaml).unwrap() {
            Value::Mapping(m) => m,
            other => panic!("expected a mapping, got {other:?}"),
        }
    }

    fn sources_of(m: &Mapping) -> Vec<String> {
        let Some(Value::Sequence(seq)) = get(m, "sources") else {
            panic!("no sources list");
        };
        seq.iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn rewrites_matching_sources() {
        let mut m = manifest(
            "sources:\n\
             \x20 - https://github.com/alice/widget\n\
             \x20 - https://github.com/alice/widget.git\n\
             \x20 - https://github.com/alice/widget#devel\n\
             \x20 - https://github.com/bob/other\n\
             \x20 - https://example.org/unrelated.git\n",
        );
        rewrite_sources(&mut m, REPO, CLONE_URL, SHA).unwrap();

        let pinned = format!("{CLONE_URL}#{SHA}");
        assert_eq!(
            sources_of(&m),
            vec![
                pinned.clone(),
                pinned.clone(),
                pinned,
                "https://github.com/bob/other".to_string(),
                "https://example.org/unrelated.git".to_string(),
            ]
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut m = manifest("sources:\n  - https://github.com/alice/widget#main\n");
        rewrite_sources(&mut m, REPO, CLONE_URL, SHA).unwrap();
        let once = sources_of(&m);
        rewrite_sources(&mut m, REPO, CLONE_URL, SHA).unwrap();
        assert_eq!(sources_of(&m), once);
    }

    #[test]
    fn manifest_without_sources_is_untouched() {
        let mut m = manifest("image: alpine/latest\n");
        rewrite_sources(&mut m, REPO, CLONE_URL, SHA).unwrap();
        assert!(get(&m, "sources").is_none());
    }

    #[test]
    fn wrong_source_shapes_are_user_errors() {
        let mut not_a_list = manifest("sources: yes\n");
        let err = rewrite_sources(&mut not_a_list, REPO, CLONE_URL, SHA).unwrap_err();
        assert!(err.user_message().is_some());

        let mut non_string = manifest("sources:\n  - 42\n");
        let err = rewrite_sources(&mut non_string, REPO, CLONE_URL, SHA).unwrap_err();
        assert!(err.user_message().is_some());
    }

    #[test]
    fn mark_submitter_creates_environment() {
        let mut m = manifest("image: alpine/latest\n");
        mark_submitter(&mut m).unwrap();
        let Some(Value::Mapping(env)) = get(&m, "environment") else {
            panic!("environment not created");
        };
        assert_eq!(
            get(env, SUBMITTER_ENV_KEY),
            Some(&Value::String(SUBMITTER_NAME.to_string()))
        );
    }

    #[test]
    fn mark_submitter_preserves_existing_environment() {
        let mut m = manifest("environment:\n  FOO: bar\n");
        mark_submitter(&mut m).unwrap();
        let Some(Value::Mapping(env)) = get(&m, "environment") else {
            panic!("environment missing");
        };
        assert_eq!(
            get(env, "FOO"),
            Some(&Value::String("bar".to_string()))
        );
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn mark_submitter_rejects_non_map_environment() {
        let mut m = manifest("environment: nope\n");
        assert!(mark_submitter(&mut m).unwrap_err().user_message().is_some());
    }

    #[test]
    fn display_name_rules() {
        assert_eq!(display_name(".build.yml"), None);
        assert_eq!(display_name(".builds/ci.yml").as_deref(), Some("ci"));
        assert_eq!(
            display_name(".builds/freebsd-13.yml").as_deref(),
            Some("freebsd-13")
        );
    }

    #[test]
    fn tags_for_pull_request() {
        assert_eq!(
            job_tags("widget", Some(12), None, None),
            vec!["widget", "pulls", "12"]
        );
    }

    #[test]
    fn tags_for_branch_push_with_named_manifest() {
        assert_eq!(
            job_tags("widget", None, Some("main"), Some("ci")),
            vec!["widget", "commits", "main", "ci"]
        );
    }

    #[test]
    fn note_layout() {
        let note = job_note(
            "fix: handle empty input\n\nLonger body.",
            SHA,
            "Alice Example",
            "https://github.com/alice/widget",
        );
        assert_eq!(
            note,
            format!(
                "fix: handle empty input\n\n[0123456789] — Alice Example\n\n\
                 [0123456789]: https://github.com/alice/widget/commit/{SHA}"
            )
        );
    }

    #[test]
    fn selection_respects_cap() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates: Vec<String> = (0..10).map(|i| format!("m{i}.yml")).collect();
        let selected = select_candidates(candidates.clone(), MAX_JOBS_PER_CHECK_SUITE, &mut rng);
        assert_eq!(selected.len(), MAX_JOBS_PER_CHECK_SUITE);
        for s in &selected {
            assert!(candidates.contains(s));
        }

        let few = select_candidates(vec!["a.yml".to_string()], MAX_JOBS_PER_CHECK_SUITE, &mut rng);
        assert_eq!(few, vec!["a.yml"]);
    }

    #[test]
    fn selection_eventually_covers_every_candidate() {
        let mut rng = StdRng::seed_from_u64(42);
        let candidates: Vec<String> = (0..10).map(|i| format!("m{i}.yml")).collect();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            for s in select_candidates(candidates.clone(), MAX_JOBS_PER_CHECK_SUITE, &mut rng) {
                seen.insert(s);
            }
        }
        assert_eq!(seen.len(), candidates.len());
    }
}
