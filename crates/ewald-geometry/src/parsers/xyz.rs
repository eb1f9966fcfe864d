//! Parser for `.xyz` coordinate files carrying charges.
//!
//! The layout is the standard XYZ format with an optional fifth column:
//! ```text
//! <num_particles>
//! <comment line>
//! <label> <x> <y> <z> [<charge>]
//! ...
//! ```
//!
//! Coordinates are taken as-is. When the charge column is missing the
//! formal charge of common monatomic ions is used; any other label without
//! a charge is an error.

use super::{ParseError, ParsedParticle};

/// Formal charges of monatomic ions recognised without an explicit column.
const FORMAL_CHARGES: &[(&str, f64)] = &[
    ("Li", 1.0),
    ("Na", 1.0),
    ("K", 1.0),
    ("Rb", 1.0),
    ("Cs", 1.0),
    ("Mg", 2.0),
    ("Ca", 2.0),
    ("F", -1.0),
    ("Cl", -1.0),
    ("Br", -1.0),
    ("I", -1.0),
    ("O", -2.0),
];

/// Formal charge of a monatomic ion label, if known.
pub fn formal_charge(label: &str) -> Option<f64> {
    FORMAL_CHARGES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(label))
        .map(|&(_, q)| q)
}

fn parse_field(value: &str, line: usize, what: &str) -> Result<f64, ParseError> {
    value.parse().map_err(|_| ParseError::FormatError {
        line,
        message: format!("Invalid {}: {}", what, value),
    })
}

/// Parse an XYZ file from a string.
pub fn parse_xyz(content: &str) -> Result<Vec<ParsedParticle>, ParseError> {
    let lines: Vec<&str> = content.lines().collect();

    if lines.len() < 2 {
        return Err(ParseError::FormatError {
            line: 1,
            message: "XYZ file must have a count line and a comment line".into(),
        });
    }

    let num_particles: usize = lines[0].trim().parse().map_err(|_| ParseError::FormatError {
        line: 1,
        message: "First line must be the number of particles".into(),
    })?;

    let mut particles = Vec::with_capacity(num_particles);
    for (idx, line) in lines[2..].iter().enumerate() {
        let line_no = idx + 3;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return Err(ParseError::FormatError {
                line: line_no,
                message: format!("Expected 'label x y z [charge]', got '{}'", line),
            });
        }

        let position = [
            parse_field(parts[1], line_no, "x coordinate")?,
            parse_field(parts[2], line_no, "y coordinate")?,
            parse_field(parts[3], line_no, "z coordinate")?,
        ];
        let charge = match parts.get(4) {
            Some(raw) => parse_field(raw, line_no, "charge")?,
            None => formal_charge(parts[0]).ok_or_else(|| ParseError::FormatError {
                line: line_no,
                message: format!("No charge given and '{}' has no known formal charge", parts[0]),
            })?,
        };

        particles.push(ParsedParticle {
            position,
            charge,
            label: parts[0].to_string(),
        });
    }

    if particles.len() != num_particles {
        return Err(ParseError::FormatError {
            line: 1,
            message: format!(
                "Header says {} particles but found {}",
                num_particles,
                particles.len()
            ),
        });
    }

    let net: f64 = particles.iter().map(|p| p.charge).sum();
    if net.abs() > 1e-8 {
        log::warn!("configuration carries net charge {:.3e}", net);
    }

    Ok(particles)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Render particles in the charged XYZ layout.
    fn to_xyz(particles: &[ParsedParticle], comment: &str) -> String {
        let mut s = format!("{}\n{}\n", particles.len(), comment);
        for p in particles {
            s.push_str(&format!(
                "{} {:.10} {:.10} {:.10} {:.6}\n",
                p.label, p.position[0], p.position[1], p.position[2], p.charge
            ));
        }
        s
    }

    #[test]
    fn test_parse_charged_xyz() {
        let content = "3\nwater-ish\nO 0.0 0.0 0.0 -0.8\nH 0.96 0.0 0.0 0.4\nH -0.24 0.93 0.0 0.4\n";
        let particles = parse_xyz(content).unwrap();
        assert_eq!(particles.len(), 3);
        assert_eq!(particles[0].label, "O");
        assert_eq!(particles[0].charge, -0.8);
        assert!((particles[1].position[0] - 0.96).abs() < 1e-12);
    }

    #[test]
    fn test_formal_charges_fill_missing_column() {
        let content = "2\nsalt\nNa 0 0 0\nCl 1 0 0\n";
        let particles = parse_xyz(content).unwrap();
        assert_eq!(particles[0].charge, 1.0);
        assert_eq!(particles[1].charge, -1.0);
    }

    #[test]
    fn test_unknown_label_without_charge() {
        let content = "1\n\nAr 0 0 0\n";
        let err = parse_xyz(content).unwrap_err().to_string();
        assert!(err.contains("Ar"), "{}", err);
    }

    #[test]
    fn test_count_mismatch() {
        let content = "5\nWrong count\nNa 0.0 0.0 0.0\nCl 1.0 0.0 0.0\n";
        let err = parse_xyz(content).unwrap_err().to_string();
        assert!(err.contains('5') && err.contains('2'), "{}", err);
    }

    #[test]
    fn test_bad_coordinate() {
        let content = "1\nBad data\nNa 1.0 xyz 3.0\n";
        let err = parse_xyz(content).unwrap_err().to_string();
        assert!(err.contains("Invalid"));
        assert!(err.contains("line 3"));
    }

    #[test]
    fn test_written_file_parses_back() {
        let particles = vec![
            ParsedParticle {
                position: [0.25, 1.5, 3.0],
                charge: 2.0,
                label: "Mg".into(),
            },
            ParsedParticle {
                position: [1.0, 1.0, 1.0],
                charge: -2.0,
                label: "O".into(),
            },
        ];
        let text = to_xyz(&particles, "MgO");
        assert_eq!(parse_xyz(&text).unwrap(), particles);
    }
}
