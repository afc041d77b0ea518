//! A minimal dot/bracket JSON path navigator shared by checks and
//! extractions, replacing the duplicate navigation logic the teacher kept
//! in both `assertions` and `extractors`.

use serde_json::Value;

/// Navigate `root` along a path like `user.addresses[0].city`.
pub fn navigate(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for segment in split(path) {
        match segment {
            Segment::Key(k) => {
                current = current.as_object()?.get(&k)?.clone();
            }
            Segment::Index(i) => {
                current = current.as_array()?.get(i)?.clone();
            }
        }
    }
    Some(current)
}

enum Segment {
    Key(String),
    Index(usize),
}

fn split(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        let mut key = String::new();
        let mut chars = part.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '[' {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
                let mut idx = String::new();
                for c2 in chars.by_ref() {
                    if c2 == ']' {
                        break;
                    }
                    idx.push(c2);
                }
                if let Ok(i) = idx.parse::<usize>() {
                    segments.push(Segment::Index(i));
                }
            } else {
                key.push(c);
            }
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigates_nested_object() {
        let v = serde_json::json!({"user": {"name": "ada"}});
        assert_eq!(navigate(&v, "user.name"), Some(serde_json::json!("ada")));
    }

    #[test]
    fn navigates_array_index() {
        let v = serde_json::json!({"items": [1, 2, 3]});
        assert_eq!(navigate(&v, "items[1]"), Some(serde_json::json!(2)));
    }

    #[test]
    fn missing_path_returns_none() {
        let v = serde_json::json!({"a": 1});
        assert_eq!(navigate(&v, "b.c"), None);
    }
}
