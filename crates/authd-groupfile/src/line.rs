//! Colon-delimited `/etc/group` line format: `name:passwd:gid:members`.

use crate::{Error, Result};

/// One parsed line of `/etc/group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLine {
    pub name: String,
    pub passwd: String,
    pub gid: String,
    pub members: Vec<String>,
}

impl GroupLine {
    /// Parses a single non-empty line. Rejects any field count other than
    /// four fields per spec.md §4.4 step 2.
    pub fn parse(line: &str, line_no: usize) -> Result<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 4 {
            return Err(Error::MalformedGroupFile {
                line: line_no,
                detail: format!("expected 4 colon-delimited fields, found {}", fields.len()),
            });
        }
        let members = if fields[3].is_empty() {
            Vec::new()
        } else {
            fields[3].split(',').map(str::to_string).collect()
        };
        Ok(Self {
            name: fields[0].to_string(),
            passwd: fields[1].to_string(),
            gid: fields[2].to_string(),
            members,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.name,
            self.passwd,
            self.gid,
            self.members.join(",")
        )
    }

    /// Replaces every member equal to `old` with `new`, in place.
    pub fn rename_member(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for member in &mut self.members {
            if member == old {
                *member = new.to_string();
                changed = true;
            }
        }
        changed
    }
}

/// Parses the full contents of a group file into lines, preserving a flag
/// for whether the original content ended with a trailing newline.
pub fn parse_group_file(content: &str) -> Result<(Vec<GroupLine>, bool)> {
    let trailing_newline = content.ends_with('\n');
    let mut lines = Vec::new();
    for (idx, raw_line) in content.lines().enumerate() {
        if raw_line.is_empty() {
            continue;
        }
        lines.push(GroupLine::parse(raw_line, idx + 1)?);
    }
    Ok((lines, trailing_newline))
}

/// Renders parsed lines back into `/etc/group` text, preserving the
/// original trailing-newline discipline.
pub fn render_group_file(lines: &[GroupLine], trailing_newline: bool) -> String {
    let mut out = lines
        .iter()
        .map(GroupLine::render)
        .collect::<Vec<_>>()
        .join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_line() {
        let line = GroupLine::parse("wheel:x:10:alice,bob", 1).unwrap();
        assert_eq!(line.name, "wheel");
        assert_eq!(line.gid, "10");
        assert_eq!(line.members, vec!["alice", "bob"]);
    }

    #[test]
    fn parses_line_with_no_members() {
        let line = GroupLine::parse("empty:x:20:", 1).unwrap();
        assert!(line.members.is_empty());
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = GroupLine::parse("wheel:x:10", 3).unwrap_err();
        match err {
            Error::MalformedGroupFile { line, .. } => assert_eq!(line, 3),
            _ => panic!("expected MalformedGroupFile"),
        }
    }

    #[test]
    fn round_trips_through_render() {
        let (lines, trailing) = parse_group_file("a:x:1:u1\nb:x:2:u2,u3\n").unwrap();
        assert!(trailing);
        assert_eq!(render_group_file(&lines, trailing), "a:x:1:u1\nb:x:2:u2,u3\n");
    }

    #[test]
    fn preserves_missing_trailing_newline() {
        let (lines, trailing) = parse_group_file("a:x:1:u1").unwrap();
        assert!(!trailing);
        assert_eq!(render_group_file(&lines, trailing), "a:x:1:u1");
    }
}
