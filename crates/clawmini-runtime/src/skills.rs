//! Skill discovery: `skills/<name>/SKILL.md` folded into `SKILLS_SNAPSHOT.md`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, instrument, warn};

pub const SNAPSHOT_FILE: &str = "SKILLS_SNAPSHOT.md";
const SKILL_FILE: &str = "SKILL.md";

const DIRECTIVE: &str = "### SYSTEM DIRECTIVE: YOUR SKILLS SOURCE OF TRUTH ###\n\
The following `<available_skills>` block is the **ONLY** source of truth for your currently available skills.\n\
Do NOT use terminal commands (like `ls`) or code to search the file system to check what skills you have.\n\
If a skill is listed below, you have it. If it is NOT listed below, you DO NOT have it.\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillEntry {
    pub name: String,
    pub description: String,
    pub location: String,
}

#[derive(Debug, Default, Deserialize)]
struct SkillFrontmatter {
    name: Option<String>,
    description: Option<String>,
}

/// The YAML between a leading `---` line and the next `---` line.
fn frontmatter_block(content: &str) -> Option<String> {
    let mut lines = content.trim_start_matches('\u{feff}').lines();
    if lines.next()?.trim_end() != "---" {
        return None;
    }
    let mut block = Vec::new();
    for line in lines {
        if line.trim_end() == "---" {
            return Some(block.join("\n"));
        }
        block.push(line);
    }
    None
}

fn parse_frontmatter(content: &str) -> SkillFrontmatter {
    let Some(block) = frontmatter_block(content) else {
        return SkillFrontmatter::default();
    };
    match serde_yaml::from_str::<Option<SkillFrontmatter>>(&block) {
        Ok(meta) => meta.unwrap_or_default(),
        Err(error) => {
            warn!(%error, "invalid skill frontmatter, using defaults");
            SkillFrontmatter::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkillsCatalog {
    skills_dir: PathBuf,
}

impl SkillsCatalog {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.skills_dir.join(SNAPSHOT_FILE)
    }

    /// Skills found on disk, sorted by directory name.
    pub async fn scan(&self) -> Result<Vec<SkillEntry>> {
        if !fs::try_exists(&self.skills_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.skills_dir)
            .await
            .with_context(|| format!("failed listing skills dir {:?}", self.skills_dir))?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        dirs.sort();

        let mut skills = Vec::new();
        for dir in dirs {
            let path = self.skills_dir.join(&dir).join(SKILL_FILE);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed reading skill {path:?}"))?;
            skills.push(Self::entry(&dir, &content));
        }
        Ok(skills)
    }

    fn entry(dir: &str, content: &str) -> SkillEntry {
        let meta = parse_frontmatter(content);
        let text = |value: Option<String>| {
            value
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        SkillEntry {
            name: text(meta.name).unwrap_or_else(|| dir.to_owned()),
            description: text(meta.description)
                .unwrap_or_else(|| "No description provided.".to_owned()),
            location: format!("./skills/{dir}/{SKILL_FILE}"),
        }
    }

    pub fn render(skills: &[SkillEntry]) -> String {
        let mut out = String::from(DIRECTIVE);
        out.push_str("\n<available_skills>\n");
        for skill in skills {
            out.push_str(&format!(
                "  <skill>\n    <name>{}</name>\n    <description>{}</description>\n    <location>{}</location>\n  </skill>\n",
                skill.name, skill.description, skill.location
            ));
        }
        out.push_str("</available_skills>");
        out
    }

    /// Rescan and rewrite the snapshot file.
    #[instrument(skip(self), fields(dir = ?self.skills_dir))]
    pub async fn refresh(&self) -> Result<String> {
        let skills = self.scan().await?;
        let snapshot = Self::render(&skills);
        fs::create_dir_all(&self.skills_dir)
            .await
            .with_context(|| format!("failed creating skills dir {:?}", self.skills_dir))?;
        write_atomic(&self.snapshot_path(), &snapshot).await?;
        debug!(skills = skills.len(), "skills snapshot refreshed");
        Ok(snapshot)
    }
}

async fn write_atomic(target: &Path, content: &str) -> Result<()> {
    let temp = target.with_extension("md.tmp");
    fs::write(&temp, content)
        .await
        .with_context(|| format!("failed writing {temp:?}"))?;
    fs::rename(&temp, target)
        .await
        .with_context(|| format!("failed publishing {target:?}"))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[test]
    fn frontmatter_values_are_unquoted() {
        let entry = SkillsCatalog::entry(
            "dir_x",
            "---\nname: 'weather'\ndescription: \"Look up: forecasts\"\n---\nbody",
        );
        assert_eq!(entry.name, "weather");
        assert_eq!(entry.description, "Look up: forecasts");

        let plain = SkillsCatalog::entry("dir_x", "no frontmatter");
        assert_eq!(plain.name, "dir_x");
        assert_eq!(plain.description, "No description provided.");
    }

    #[test]
    fn crlf_frontmatter_is_read() {
        let entry = SkillsCatalog::entry(
            "dir_x",
            "---\r\nname: weather\r\ndescription: Forecast lookup\r\n---\r\nbody",
        );
        assert_eq!(
            entry,
            SkillEntry {
                name: "weather".into(),
                description: "Forecast lookup".into(),
                location: "./skills/dir_x/SKILL.md".into(),
            }
        );
    }

    #[test]
    fn block_scalars_and_comments_follow_yaml() {
        let entry = SkillsCatalog::entry(
            "dir_x",
            "---\n# owner: ops\nname: weather # short name\ndescription: >\n  Looks up\n  forecasts\nversion: 2\n---\n",
        );
        assert_eq!(entry.name, "weather");
        assert_eq!(entry.description, "Looks up forecasts");
    }

    #[test]
    fn invalid_frontmatter_falls_back_to_defaults() {
        let entry = SkillsCatalog::entry("dir_x", "---\nname: [unclosed\n---\n");
        assert_eq!(entry.name, "dir_x");
        assert_eq!(entry.description, "No description provided.");
    }

    #[tokio::test]
    async fn refresh_lists_skill_directories() -> Result<()> {
        let root = unique_test_root("clawmini-skills");
        fs::create_dir_all(root.join("weather")).await?;
        fs::create_dir_all(root.join("notes")).await?;
        fs::create_dir_all(root.join("empty")).await?;
        fs::write(
            root.join("weather").join(SKILL_FILE),
            "---\nname: weather\ndescription: Forecast lookup\n---\n",
        )
        .await?;
        fs::write(root.join("notes").join(SKILL_FILE), "# Notes skill").await?;

        let catalog = SkillsCatalog::new(&root);
        let snapshot = catalog.refresh().await?;

        assert!(snapshot.starts_with("### SYSTEM DIRECTIVE"));
        let notes = snapshot.find("<name>notes</name>").unwrap_or(usize::MAX);
        let weather = snapshot.find("<name>weather</name>").unwrap_or(usize::MAX);
        assert!(notes < weather && weather != usize::MAX);
        assert!(snapshot.contains("<description>No description provided.</description>"));
        assert!(snapshot.contains("<location>./skills/weather/SKILL.md</location>"));
        assert!(!snapshot.contains("<name>empty</name>"));
        assert_eq!(fs::read_to_string(catalog.snapshot_path()).await?, snapshot);
        Ok(())
    }

    #[tokio::test]
    async fn missing_dir_yields_empty_block() -> Result<()> {
        let catalog = SkillsCatalog::new(unique_test_root("clawmini-skills-missing"));
        assert!(catalog.scan().await?.is_empty());
        let snapshot = catalog.refresh().await?;
        assert!(snapshot.ends_with("<available_skills>\n</available_skills>"));
        Ok(())
    }
}
