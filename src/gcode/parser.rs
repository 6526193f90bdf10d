use super::types::MotionCommand;

/// Classify a single comment-stripped g-code line.
///
/// The first G word decides the command class, matching how the firmware
/// reads modal lines: `G90 G1 X0 Y0` classifies as `Other` and passes
/// through untouched. Axis words with unparseable numbers are treated as
/// absent rather than failing the line.
pub fn parse_line(code: &str) -> MotionCommand {
    let mut g_code: Option<i32> = None;
    let mut x: Option<f64> = None;
    let mut y: Option<f64> = None;

    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        match c.to_ascii_uppercase() {
            'G' => {
                let v = extract_int(&mut chars);
                if g_code.is_none() {
                    g_code = v;
                }
            }
            'X' => x = extract_float(&mut chars),
            'Y' => y = extract_float(&mut chars),
            _ => {}
        }
    }

    match g_code {
        Some(0) => MotionCommand::Move { rapid: true, x, y },
        Some(1) => MotionCommand::Move { rapid: false, x, y },
        _ => MotionCommand::Other,
    }
}

fn extract_int(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<i32> {
    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '-' || c == '+' {
            s.push(c);
            chars.next();
        } else {
            break;
        }
    }
    s.parse().ok()
}

fn extract_float(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<f64> {
    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' {
            s.push(c);
            chars.next();
        } else {
            break;
        }
    }
    // An exponent continuation would change meaning once the lexeme is
    // substituted, so such a word reads as absent and the line passes
    // through untouched.
    if let Some(&c) = chars.peek() {
        if c == 'e' || c == 'E' {
            return None;
        }
    }
    s.parse().ok()
}
