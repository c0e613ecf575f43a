use console::Style;

use crate::error::Warning;
use crate::manifest::Manifest;
use crate::mutants::MutantStatus;
use crate::state::{MutantRecord, MutationReport};

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

pub fn print_warnings(warnings: &[Warning]) {
    if warnings.is_empty() {
        return;
    }
    let dim = Style::new().dim();
    let style = Style::new().yellow();
    println!(
        "  {} {} warning(s):",
        dim.apply_to("·"),
        warnings.len()
    );
    for w in warnings {
        println!("    {} {}", style.apply_to("!"), w);
    }
}

fn status_style(status: MutantStatus) -> Style {
    match status {
        MutantStatus::Killed => Style::new().green(),
        MutantStatus::Survived => Style::new().yellow().bold(),
        MutantStatus::NotCovered => Style::new().dim(),
        MutantStatus::Inconclusive => Style::new().magenta(),
    }
}

pub fn print_instrumented(manifest: &Manifest, root: &std::path::Path) {
    print_success(&format!(
        "{}: {} mutants in {} files",
        root.display(),
        manifest.mutants.len(),
        manifest.files.len(),
    ));
    if manifest.mutation_enabled {
        let dim = Style::new().dim();
        println!("  {} mutation enabled by default", dim.apply_to("·"));
    }
    print_warnings(&manifest.warnings);
}

pub fn print_mutations(manifest: &Manifest) {
    let id_style = Style::new().cyan().bold();
    let loc_style = Style::new().dim();
    for m in &manifest.mutants {
        println!(
            "  {} {}:{} {}",
            id_style.apply_to(&m.id),
            m.file,
            m.line,
            loc_style.apply_to(&m.description),
        );
    }
    println!();
    println!("{} mutants", manifest.mutants.len());
}

pub fn print_report(report: &MutationReport) {
    let s = &report.summary;
    let score_pct = s.score * 100.0;

    if report.pseudo_tested.is_empty() {
        let style = Style::new().green().bold();
        println!(
            "{} {} mutants: {} killed, {} not covered, {} inconclusive ({:.1}% killed) in {:.1}s",
            style.apply_to("✓"),
            s.total,
            s.killed,
            s.not_covered,
            s.inconclusive,
            score_pct,
            s.duration_ms as f64 / 1000.0,
        );
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {} pseudo-tested / {} mutants ({} killed, {} not covered, {} inconclusive, {:.1}% killed) in {:.1}s",
            style.apply_to("!"),
            s.survived,
            s.total,
            s.killed,
            s.not_covered,
            s.inconclusive,
            score_pct,
            s.duration_ms as f64 / 1000.0,
        );
    }

    let dim = Style::new().dim();
    println!(
        "  {} {} test executions ({} with one mutant per run)",
        dim.apply_to("·"),
        s.executions,
        s.exhaustive_executions,
    );

    if !report.pseudo_tested.is_empty() {
        println!();
        let id_style = Style::new().cyan().bold();
        for m in report.mutants.iter().filter(|m| m.is_pseudo_tested()) {
            println!(
                "  {} {}:{} {}",
                id_style.apply_to(&m.id),
                m.file,
                m.line,
                dim.apply_to(&m.description),
            );
        }
    }
    print_warnings(&report.warnings);
}

pub fn print_mutant_detail(m: &MutantRecord) {
    let id_style = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!(
        "{} {}:{} [{}] {}",
        id_style.apply_to(&m.id),
        m.file,
        m.line,
        m.operator,
        status_style(m.status).apply_to(m.status),
    );
    println!("  {} {}", dim.apply_to("in"), m.scope);
    println!("  {}", dim.apply_to(&m.description));
    println!();

    if m.covering_tests.is_empty() {
        println!("  no test reaches this site");
    }
    for test in &m.covering_tests {
        let mark = if m.killed_by.contains(test) {
            Style::new().green().apply_to("✓ fails")
        } else {
            Style::new().yellow().apply_to("· passes")
        };
        println!("  {} {}", mark, test);
    }
    if let Some(ref fault) = m.fault {
        println!("  {} {}", Style::new().magenta().apply_to("?"), fault);
    }
}

pub fn print_status(report: &MutationReport) {
    let s = &report.summary;
    if !s.session.is_empty() {
        println!("Session {}", Style::new().dim().apply_to(&s.session));
    }
    println!(
        "Last run: {} mutants, {} killed, {} survived, {} not covered, {} inconclusive ({:.1}% score)",
        s.total,
        s.killed,
        s.survived,
        s.not_covered,
        s.inconclusive,
        s.score * 100.0,
    );

    if !report.pseudo_tested.is_empty() {
        println!();
        let id_style = Style::new().cyan().bold();
        for m in report.mutants.iter().filter(|m| m.is_pseudo_tested()) {
            println!("  {} {}:{}", id_style.apply_to(&m.id), m.file, m.line);
        }
        println!();
        println!("Use `pseudotest show <id>` for details on a specific mutant.");
    }
}

pub fn print_diff(file: &str, diff: &str) {
    println!("{}", Style::new().bold().apply_to(file));
    for line in diff.lines() {
        if line.starts_with('-') {
            println!("  {}", Style::new().red().apply_to(line));
        } else if line.starts_with('+') {
            println!("  {}", Style::new().green().apply_to(line));
        }
    }
    println!();
}
