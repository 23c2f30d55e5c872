//! Whitespace tokenizer with double-quoted segments kept as single fields.

/// Split a log line into fields. A `"` toggles the inside-quoted state;
/// whitespace inside a quoted segment does not split. Quote characters
/// themselves are not part of the field value, so `"-"` tokenizes the
/// same as `-` and `""` yields an empty field.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    // True once the current field has seen any character, including a
    // bare quote — `""` must still produce a field.
    let mut has_field = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_field = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_field {
                    fields.push(std::mem::take(&mut current));
                    has_field = false;
                }
            }
            c => {
                current.push(c);
                has_field = true;
            }
        }
    }
    if has_field {
        fields.push(current);
    }
    fields
}
