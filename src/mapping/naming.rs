/// `OrderLine` → `ORDER_LINE`, `display_name` → `DISPLAY_NAME`, `HTTPServer` → `HTTP_SERVER`.
pub fn to_snake_upper(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev != '_' && (prev.is_lowercase() || prev.is_ascii_digit() || next_is_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_uppercase());
    }
    out
}

/// Column holding a single navigation's foreign key.
pub fn foreign_key_column(field_name: &str) -> String {
    format!("FK_{}", to_snake_upper(field_name))
}
