//! String-aware scan of the STEP `DATA;` section.
//!
//! Entities may span lines and their strings may contain `;`, `(`, `)` and
//! comment-looking text, so the scanner walks bytes tracking quote state
//! instead of splitting on line ends.

use crate::error::IfcError;

/// One raw entity instance: `#id = TYPE ( args ) ;`
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    pub id: u32,
    pub type_name: String,
    /// Byte range of the attribute list inside the source, excluding the
    /// outer parentheses.
    pub args: std::ops::Range<usize>,
}

/// Header fields read from the `HEADER;` section.
#[derive(Debug, Default, Clone)]
pub struct StepHeader {
    pub schema_version: Option<String>,
}

pub fn parse_header(content: &str) -> StepHeader {
    let mut header = StepHeader::default();
    // FILE_SCHEMA(('IFC4'));
    if let Some(pos) = content.find("FILE_SCHEMA") {
        let tail = &content[pos..];
        if let Some(start) = tail.find('\'') {
            if let Some(len) = tail[start + 1..].find('\'') {
                header.schema_version = Some(tail[start + 1..start + 1 + len].to_string());
            }
        }
    }
    header
}

/// Scan every entity in the `DATA;` section.
pub fn scan_entities(content: &str) -> Result<Vec<RawEntity>, IfcError> {
    if !content.trim_start().starts_with("ISO-10303-21") {
        return Err(IfcError::NotStep);
    }
    let data_start = content.find("DATA;").ok_or(IfcError::MissingDataSection)? + "DATA;".len();
    let bytes = content.as_bytes();
    let mut entities = Vec::new();
    let mut i = data_start;

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                let entity_start = i;
                i += 1;
                let id_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let id: u32 = content[id_start..i]
                    .parse()
                    .map_err(|_| IfcError::MalformedEntity(entity_start))?;

                i = skip_ws(bytes, i);
                if i >= bytes.len() || bytes[i] != b'=' {
                    return Err(IfcError::MalformedEntity(entity_start));
                }
                i = skip_ws(bytes, i + 1);

                let type_start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let type_name = content[type_start..i].to_ascii_uppercase();
                if type_name.is_empty() {
                    return Err(IfcError::MalformedEntity(entity_start));
                }

                i = skip_ws(bytes, i);
                if i >= bytes.len() || bytes[i] != b'(' {
                    return Err(IfcError::MalformedEntity(entity_start));
                }
                let args_start = i + 1;
                let args_end = matching_paren(bytes, i)
                    .ok_or(IfcError::MalformedEntity(entity_start))?;
                entities.push(RawEntity {
                    id,
                    type_name,
                    args: args_start..args_end,
                });
                i = args_end + 1;
            }
            b'E' if content[i..].starts_with("ENDSEC") => break,
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i = content[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .unwrap_or(bytes.len());
            }
            _ => i += 1,
        }
    }

    Ok(entities)
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Given `bytes[open] == b'('`, return the index of the matching `)`.
/// Quote-aware: parentheses inside STEP strings do not count.
fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                // A doubled quote inside a string is an escape, not a close.
                if in_string && i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                    i += 1;
                } else {
                    in_string = !in_string;
                }
            }
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNIPPET: &str = "ISO-10303-21;\n\
        HEADER;\nFILE_SCHEMA(('IFC4'));\nENDSEC;\n\
        DATA;\n\
        #1=IFCWALL('guid',#2,'A wall; with (tricky) text',$,$,#3,#4,'tag');\n\
        #2= IFCOWNERHISTORY($,$,$,$,$,$,$,0);\n\
        /* comment with #99=FAKE(); inside */\n\
        #10=IFCPROPERTYSET('psetguid',#2,'Pset_WallCommon',$,(#11));\n\
        ENDSEC;\nEND-ISO-10303-21;\n";

    #[test]
    fn scans_entities_and_header() {
        let header = parse_header(SNIPPET);
        assert_eq!(header.schema_version.as_deref(), Some("IFC4"));

        let entities = scan_entities(SNIPPET).unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].id, 1);
        assert_eq!(entities[0].type_name, "IFCWALL");
        assert_eq!(entities[1].id, 2);
        assert_eq!(entities[2].type_name, "IFCPROPERTYSET");

        let args = &SNIPPET[entities[0].args.clone()];
        assert!(args.contains("tricky"));
        assert!(!args.starts_with('('));
    }

    #[test]
    fn rejects_non_step_input() {
        assert!(matches!(
            scan_entities("hello world"),
            Err(IfcError::NotStep)
        ));
        assert!(matches!(
            scan_entities("ISO-10303-21;\nHEADER;\nENDSEC;\n"),
            Err(IfcError::MissingDataSection)
        ));
    }

    #[test]
    fn string_quoting_hides_delimiters() {
        let src = "ISO-10303-21;DATA;#1=IFCWALL('it''s; (nested)');ENDSEC;";
        let entities = scan_entities(src).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(&src[entities[0].args.clone()], "'it''s; (nested)'");
    }
}
