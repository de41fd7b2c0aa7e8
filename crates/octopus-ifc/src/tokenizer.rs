//! Attribute-list tokenizer for STEP entity instances.
//!
//! Decodes the text between the outer parentheses of
//! `#12=IFCPROPERTYSINGLEVALUE(...);` into [`AttributeValue`]s.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair},
    IResult, Parser,
};

use crate::value::AttributeValue;

fn ws(input: &str) -> IResult<&str, ()> {
    let (input, _) = multispace0(input)?;
    Ok((input, ()))
}

/// `#123`
fn entity_ref(input: &str) -> IResult<&str, AttributeValue> {
    let (input, _) = char('#')(input)?;
    let (input, digits) = take_while1(|c: char| c.is_ascii_digit())(input)?;
    let id = digits.parse::<u32>().unwrap_or(0);
    Ok((input, AttributeValue::EntityRef(id)))
}

/// `'text'` with `''` as the escaped quote. The content is kept verbatim;
/// \X\ directionality encodings are not interpreted.
fn step_string(input: &str) -> IResult<&str, AttributeValue> {
    let (input, _) = char('\'')(input)?;

    let bytes = input.as_bytes();
    let mut end = 0;
    while end < bytes.len() {
        if bytes[end] == b'\'' {
            if end + 1 < bytes.len() && bytes[end + 1] == b'\'' {
                end += 2;
                continue;
            }
            break;
        }
        end += 1;
    }
    if end >= bytes.len() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let content = input[..end].replace("''", "'");
    Ok((&input[end + 1..], AttributeValue::String(content)))
}

fn number(input: &str) -> IResult<&str, AttributeValue> {
    let (input, num_str) = recognize((
        opt(alt((char('-'), char('+')))),
        take_while1(|c: char| c.is_ascii_digit()),
        opt(pair(char('.'), take_while(|c: char| c.is_ascii_digit()))),
        opt((
            alt((char('e'), char('E'))),
            opt(alt((char('+'), char('-')))),
            take_while1(|c: char| c.is_ascii_digit()),
        )),
    ))
    .parse(input)?;

    if num_str.contains('.') || num_str.contains('e') || num_str.contains('E') {
        let f = num_str.parse::<f64>().unwrap_or(0.0);
        Ok((input, AttributeValue::Float(f)))
    } else {
        let i = num_str.parse::<i64>().unwrap_or(0);
        Ok((input, AttributeValue::Integer(i)))
    }
}

/// `.NOTDEFINED.`
fn enumeration(input: &str) -> IResult<&str, AttributeValue> {
    let (input, _) = char('.')(input)?;
    let (input, name) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)?;
    let (input, _) = char('.')(input)?;
    Ok((input, AttributeValue::Enum(name.to_string())))
}

fn null_value(input: &str) -> IResult<&str, AttributeValue> {
    let (input, _) = char('$')(input)?;
    Ok((input, AttributeValue::Null))
}

fn derived_value(input: &str) -> IResult<&str, AttributeValue> {
    let (input, _) = char('*')(input)?;
    Ok((input, AttributeValue::Derived))
}

fn list(input: &str) -> IResult<&str, AttributeValue> {
    let (input, items) = delimited(
        pair(char('('), ws),
        separated_list0((ws, char(','), ws), attribute),
        pair(ws, char(')')),
    )
    .parse(input)?;
    Ok((input, AttributeValue::List(items)))
}

/// `IFCLABEL('text')`
fn typed_value(input: &str) -> IResult<&str, AttributeValue> {
    let (input, type_name) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)?;
    let (input, _) = ws(input)?;
    let (input, args) = delimited(
        pair(char('('), ws),
        separated_list0((ws, char(','), ws), attribute),
        pair(ws, char(')')),
    )
    .parse(input)?;
    Ok((
        input,
        AttributeValue::Typed(type_name.to_ascii_uppercase(), args),
    ))
}

fn attribute(input: &str) -> IResult<&str, AttributeValue> {
    alt((
        entity_ref,
        step_string,
        enumeration,
        number,
        null_value,
        derived_value,
        list,
        typed_value,
    ))
    .parse(input)
}

/// Decode a full attribute list (the text between the entity's outer
/// parentheses). Returns `None` when the text does not parse cleanly to the
/// end; callers treat that as an undecodable entity.
pub fn parse_attributes(args: &str) -> Option<Vec<AttributeValue>> {
    let (rest, values) = separated_list0((ws, char(','), ws), attribute)
        .parse(args.trim())
        .ok()?;
    if rest.trim().is_empty() {
        Some(values)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mixed_attribute_list() {
        let attrs =
            parse_attributes("'2O2Fr$t4X7Zf8NOew3FLOH',#5,'Wall-01',$,.ELEMENT.,#20,3.5,-2")
                .unwrap();
        assert_eq!(attrs.len(), 8);
        assert_eq!(attrs[0].as_str(), Some("2O2Fr$t4X7Zf8NOew3FLOH"));
        assert_eq!(attrs[1].as_entity_ref(), Some(5));
        assert_eq!(attrs[3], AttributeValue::Null);
        assert_eq!(attrs[4], AttributeValue::Enum("ELEMENT".into()));
        assert_eq!(attrs[6], AttributeValue::Float(3.5));
        assert_eq!(attrs[7], AttributeValue::Integer(-2));
    }

    #[test]
    fn decodes_typed_and_nested_lists() {
        let attrs = parse_attributes("'Width',$,IFCLENGTHMEASURE(0.3),$").unwrap();
        assert_eq!(attrs[2].as_f64(), Some(0.3));
        assert_eq!(attrs[2].type_tag(), Some("IFCLENGTHMEASURE"));

        let attrs = parse_attributes("(#1,#2,(#3)),.T.").unwrap();
        let list = attrs[0].as_list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[2].as_list().unwrap()[0].as_entity_ref(), Some(3));
    }

    #[test]
    fn escaped_quotes_are_unescaped() {
        let attrs = parse_attributes("'it''s a wall'").unwrap();
        assert_eq!(attrs[0].as_str(), Some("it's a wall"));
    }

    #[test]
    fn scientific_notation() {
        let attrs = parse_attributes("1.0E-5,2E3").unwrap();
        assert_eq!(attrs[0].as_f64(), Some(1.0e-5));
        assert_eq!(attrs[1].as_f64(), Some(2000.0));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(parse_attributes("'a',@@").is_none());
    }
}
