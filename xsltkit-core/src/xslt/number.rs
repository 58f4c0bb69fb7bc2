//! Number formatting for XPath 1.0 string conversion and `xsl:number`

/// XPath 1.0 string form of a number: no exponent, integers without `.0`
pub fn xpath1_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e18 {
        return (n as i64).to_string();
    }
    n.to_string()
}

/// Format a list of numbers with an `xsl:number` format string
///
/// Alphanumeric runs are format tokens and the runs between them are
/// separators. Extra numbers reuse the last token and separator.
pub fn format_numbers(numbers: &[u64], format: &str, grouping: Option<&(String, usize)>) -> String {
    let mut runs: Vec<(bool, String)> = Vec::new();
    for c in format.chars() {
        let alphanumeric = c.is_alphanumeric();
        match runs.last_mut() {
            Some((kind, run)) if *kind == alphanumeric => run.push(c),
            _ => runs.push((alphanumeric, c.to_string())),
        }
    }

    let prefix = if matches!(runs.first(), Some((false, _))) {
        runs.remove(0).1
    } else {
        String::new()
    };
    let suffix = if matches!(runs.last(), Some((false, _))) {
        runs.pop().map(|(_, run)| run).unwrap_or_default()
    } else {
        String::new()
    };
    let tokens: Vec<&str> = runs.iter().filter(|(a, _)| *a).map(|(_, r)| r.as_str()).collect();
    let separators: Vec<&str> = runs.iter().filter(|(a, _)| !*a).map(|(_, r)| r.as_str()).collect();

    let mut out = prefix;
    for (i, &n) in numbers.iter().enumerate() {
        if i > 0 {
            let separator = separators.get(i - 1).or(separators.last()).copied().unwrap_or(".");
            out.push_str(separator);
        }
        let token = tokens.get(i).or(tokens.last()).copied().unwrap_or("1");
        out.push_str(&format_token(n, token, grouping));
    }
    out.push_str(&suffix);
    out
}

fn format_token(n: u64, token: &str, grouping: Option<&(String, usize)>) -> String {
    match token {
        "A" => alphabetic(n, b'A'),
        "a" => alphabetic(n, b'a'),
        "I" => roman(n).unwrap_or_else(|| decimal(n, 1, grouping)),
        "i" => roman(n)
            .map(|r| r.to_lowercase())
            .unwrap_or_else(|| decimal(n, 1, grouping)),
        // `01`, `001`: zero padded to the token's width
        t if t.ends_with('1') && t[..t.len() - 1].chars().all(|c| c == '0') => {
            decimal(n, t.len(), grouping)
        }
        _ => decimal(n, 1, grouping),
    }
}

fn decimal(n: u64, width: usize, grouping: Option<&(String, usize)>) -> String {
    let digits = format!("{:0width$}", n, width = width);
    let Some((separator, size)) = grouping else {
        return digits;
    };
    let mut out = String::with_capacity(digits.len() * 2);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % size == 0 {
            out.push_str(separator);
        }
        out.push(c);
    }
    out
}

/// `a`..`z`, then `aa`, `ab`...
fn alphabetic(mut n: u64, first: u8) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((first + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}

fn roman(mut n: u64) -> Option<String> {
    const NUMERALS: [(u64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    if n == 0 || n >= 4000 {
        return None;
    }
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    Some(out)
}
