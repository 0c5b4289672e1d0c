pub mod parse;
pub mod tokenize;
pub mod validate;

// Field shapes shared by the validator (coarse line matching) and the
// tokenizer (classification). A field is a comma- and
// whitespace-delimited slice of one source line.

pub(crate) fn is_ws(c: char) -> bool {
    c == ' ' || c == '\t'
}

pub(crate) fn is_label_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-'
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `#`, optional minus, digits.
pub(crate) fn is_decimal_field(field: &str) -> bool {
    match field.strip_prefix('#') {
        Some(body) => is_digits(body.strip_prefix('-').unwrap_or(body)),
        None => false,
    }
}

/// `#` followed by a signed decimal fraction, `nan`, or signed `inf`.
pub(crate) fn is_floating_field(field: &str) -> bool {
    let body = match field.strip_prefix('#') {
        Some(body) => body,
        None => return false,
    };
    if body == "nan" || body == "inf" || body == "-inf" {
        return true;
    }

    let body = body.strip_prefix('-').unwrap_or(body);
    match body.find('.') {
        Some(dot) => is_digits(&body[..dot]) && is_digits(&body[dot + 1..]),
        None => false,
    }
}

pub(crate) fn is_register_field(field: &str) -> bool {
    (field.starts_with('r') || field.starts_with('R')) && is_digits(&field[1..])
}

pub(crate) fn is_address_field(field: &str) -> bool {
    is_digits(field)
}

pub(crate) fn is_identifier_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(is_label_char)
}

pub(crate) fn is_operand_field(field: &str) -> bool {
    is_decimal_field(field)
        || is_floating_field(field)
        || is_register_field(field)
        || is_address_field(field)
        || is_identifier_field(field)
}
