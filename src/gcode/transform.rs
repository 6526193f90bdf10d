use crate::config::MachineGeometry;

use super::filter;
use super::parser;
use super::types::MotionCommand;

/// Rewrites Cartesian G0/G1 moves into polargraph belt lengths.
///
/// Lines of any other class, and moves missing either axis, come back
/// byte-identical apart from comment stripping and trimming.
pub struct BeltTransformer {
    geometry: MachineGeometry,
    a_home: f64,
    b_home: f64,
}

impl BeltTransformer {
    pub fn new(geometry: MachineGeometry) -> Self {
        Self {
            a_home: geometry.a_home(),
            b_home: geometry.b_home(),
            geometry,
        }
    }

    /// Belt lengths for a Cartesian point, relative to the home lengths,
    /// rounded to the firmware's 0.001 command resolution.
    pub fn belts(&self, x: f64, y: f64) -> (f64, f64) {
        let g = &self.geometry;
        let a = (g.a_x + g.origin_x + x).hypot(g.a_y + g.origin_y + y) - self.a_home;
        let b = (g.b_x + g.origin_x + x).hypot(g.b_y + g.origin_y + y) - self.b_home;
        (round3(a), round3(b))
    }

    /// Rewrite one raw program line into its wire form.
    pub fn rewrite(&self, line: &str) -> String {
        let code = filter::remove_comment(line).trim();
        match parser::parse_line(code) {
            MotionCommand::Move {
                x: Some(x),
                y: Some(y),
                ..
            } => {
                let (a, b) = self.belts(x, y);
                splice_axes(code, a, b)
            }
            _ => code.to_string(),
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Replace the numeric text of the X and Y words in-place, leaving every
/// other word of the line untouched.
fn splice_axes(code: &str, a: f64, b: f64) -> String {
    let mut out = String::with_capacity(code.len() + 8);
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if !matches!(c, 'X' | 'x' | 'Y' | 'y') {
            continue;
        }
        // Consume exactly the lexeme the parser read as the axis value.
        let mut consumed = false;
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() || matches!(d, '.' | '-' | '+') {
                consumed = true;
                chars.next();
            } else {
                break;
            }
        }
        if consumed {
            let v = if c.eq_ignore_ascii_case(&'X') { a } else { b };
            out.push_str(&format!("{v:.3}"));
        }
    }
    out
}
