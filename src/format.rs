use std::fmt::Display;

/// Gray column divider used by every report.
pub const HDIV: &str = "\x1b[90m|\x1b[0m";

/// Width of the widest rendered item, in characters.
pub fn justification<I, T>(items: I) -> usize
where
  I: IntoIterator<Item = T>,
  T: Display,
{
  items
    .into_iter()
    .map(|item| item.to_string().chars().count())
    .max()
    .unwrap_or(0)
}

/// Inserts `,` between every group of three digits of an unsigned integer
/// string.
fn group_thousands(digits: &str) -> String {
  let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
  for (i, c) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(c);
  }

  grouped
}

/// Formats an integer with thousands separators, e.g. `10,000`.
pub fn fmt_int(num: u64) -> String {
  group_thousands(&num.to_string())
}

/// Formats a number with `dec` decimals and thousands separators, e.g.
/// `1,234.50`.
pub fn fmt_num(num: f64, dec: usize) -> String {
  if !num.is_finite() {
    return num.to_string();
  }

  let fixed = format!("{:.dec$}", num.abs());
  let (int, frac) = match fixed.split_once('.') {
    Some((int, frac)) => (int, Some(frac)),
    None => (fixed.as_str(), None),
  };

  let sign = if num < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
    "-"
  } else {
    ""
  };

  match frac {
    Some(frac) => format!("{sign}{}.{frac}", group_thousands(int)),
    None => format!("{sign}{}", group_thousands(int)),
  }
}

/// Renders a nanosecond count in the largest unit that keeps it readable.
pub fn human_ns(ns: f64) -> String {
  let sec = ns / 1_000_000_000.0;
  if sec >= 1.0 {
    return format!("{} sec", fmt_num(sec, 2));
  }

  let ms = ns / 1_000_000.0;
  if ms >= 1.0 {
    return format!("{} ms", fmt_num(ms, 2));
  }

  let micros = ns / 1_000.0;
  if micros >= 0.2 {
    return format!("{} μs", fmt_num(micros, 2));
  }

  format!("{} ns", fmt_num(ns, 2))
}

/// Percentage of `value` relative to `reference`, rendered with two decimals.
pub fn percent_of(value: f64, reference: f64) -> String {
  if reference <= 0.0 {
    return fmt_num(0.0, 2);
  }

  fmt_num(value * 100.0 / reference, 2)
}
