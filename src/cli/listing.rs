use std::io::{self, Write};

use pcapflow_core::pipeline::{ComponentKind, Registry, SEPARATOR};

/// Print every registered component, grouped by kind.
pub fn list_components(registry: &Registry, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Pipeline components:")?;
    writeln!(out, "{:-<50}", "")?;
    for kind in ComponentKind::ALL {
        writeln!(out, "  {:<16} {}", kind.as_str(), registry.names(kind).join(", "))?;
    }
    writeln!(out)?;
    writeln!(out, "Input:  source{SEPARATOR}[modifier{SEPARATOR}...]input-format")?;
    writeln!(out, "Output: output-format{SEPARATOR}[modifier{SEPARATOR}...]sink")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcapflow_core::{builtin_registry, ComponentConfig};

    #[test]
    fn test_list_components() {
        let registry = builtin_registry(&ComponentConfig::default());
        let mut out = Vec::new();
        list_components(&registry, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("source           file, stdin, tcp"));
        assert!(text.contains("sink             file, gcs, s3, stdout"));
        assert!(text.contains("Input:  source|[modifier|...]input-format"));
    }
}
