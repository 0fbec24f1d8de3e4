use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::str::contains;

fn loom() -> Command {
    Command::cargo_bin("loom").unwrap()
}

fn out_path(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR"));
    fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

#[test]
fn runs_without_arguments() {
    loom().assert().success();
}

#[test]
fn runs_sum() {
    loom()
        .arg("run")
        .arg("tests/files/sum.s")
        .arg("--minimal")
        .assert()
        .success()
        .stdout(contains("IEP: 0x0012 Value of r1: 55"))
        .stdout(contains("Program properly finished executing"))
        .stdout(contains("R0: 0x0000 R1: 0x0037"))
        .stdout(contains("FLAGS: Z: 1 O: 0 C: 0 N: 0"))
        .stdout(contains("IEP: 0x0016 SP: 0x10000"));
}

#[test]
fn links_two_files() {
    loom()
        .arg("run")
        .arg("tests/files/link/a_main.s")
        .arg("tests/files/link/b_lib.s")
        .assert()
        .success()
        .stdout(contains("a_main.s exporting 1 symbols"))
        .stdout(contains("b_lib.s exporting 1 symbols"))
        .stdout(contains("IEP: 0x0008 Value of r1: 40"));
}

#[test]
fn expands_globs_in_order() {
    loom()
        .arg("run")
        .arg("tests/files/link/*.s")
        .arg("--minimal")
        .assert()
        .success()
        .stdout(contains("Value of r1: 40"));
}

#[test]
fn reads_words_through_a_pointer() {
    loom()
        .arg("run")
        .arg("tests/files/table.s")
        .arg("-m")
        .assert()
        .success()
        .stdout(contains("Value of r2: 137"));
}

#[test]
fn reads_console_input() {
    loom()
        .arg("run")
        .arg("tests/files/echo.s")
        .arg("--minimal")
        .write_stdin("21\n")
        .assert()
        .success()
        .stdout(contains("Enter value into r1:"))
        .stdout(contains("Value of r1: 42"));
}

#[test]
fn bad_console_input_faults() {
    loom()
        .arg("run")
        .arg("tests/files/echo.s")
        .arg("--minimal")
        .write_stdin("lots\n")
        .assert()
        .failure()
        .stderr(contains("Console input failed"));
}

#[test]
fn memory_fault_dumps_state() {
    loom()
        .arg("run")
        .arg("tests/files/fault.s")
        .arg("--minimal")
        .assert()
        .failure()
        .stderr(contains("Memory fault at 0x0000"))
        .stderr(contains("IEP: 0x0004"));
}

#[test]
fn reports_syntax_errors() {
    loom()
        .arg("check")
        .arg("tests/files/bad_syntax.s")
        .assert()
        .failure()
        .stderr(contains("Expected operand, found end of line"))
        .stderr(contains("1 file(s) contain syntax errors"));
}

#[test]
fn reports_undefined_symbols() {
    loom()
        .arg("check")
        .arg("tests/files/undefined.s")
        .assert()
        .failure()
        .stderr(contains("Undefined symbol: nowhere"));

    loom()
        .arg("check")
        .arg("tests/files/link/a_main.s")
        .assert()
        .failure()
        .stderr(contains("Undefined symbol: double"));
}

#[test]
fn checks_linked_files() {
    loom()
        .arg("check")
        .arg("tests/files/link/a_main.s")
        .arg("tests/files/link/b_lib.s")
        .assert()
        .success()
        .stdout(contains("no errors found!"));
}

#[test]
fn assembles_listing_and_object() {
    let object = out_path("sum.out");
    loom()
        .arg("asm")
        .arg("tests/files/sum.s")
        .arg("-o")
        .arg(&object)
        .assert()
        .success();

    let bytes = fs::read(&object).unwrap();
    assert_eq!(bytes.len(), 0x16);
    assert_eq!(bytes[..4], [0x83, 0x0F, 0x0A, 0x00]);
    assert_eq!(bytes[0x14..], [0x90, 0x00]);

    let mut listing = object.into_os_string();
    listing.push(".txt");
    let listing = fs::read_to_string(listing).unwrap();
    assert!(listing.starts_with("//FILE: tests/files/sum.s\n"));
    assert!(listing.contains("start:\tmov r0, #10 //(2 @ 0x0000) = 83 0f 0a 00\n"));
    assert!(listing.contains("loop:\tadd r1, r1, r0 //(4 @ 0x0008) = 01 10\n"));
    assert!(listing.contains("\t\tjgt loop //(6 @ 0x000e) = 82 0f fa ff\n"));
}

#[test]
fn skips_listing() {
    let object = out_path("skip.out");
    let listing = out_path("skip.lst");
    let _ = fs::remove_file(&listing);
    loom()
        .arg("asm")
        .arg("tests/files/echo.s")
        .arg("-o")
        .arg(&object)
        .arg("-l")
        .arg(&listing)
        .arg("--skip-listing")
        .assert()
        .success();
    assert!(object.exists());
    assert!(!listing.exists());
}

#[test]
fn runs_and_disassembles_object() {
    let object = out_path("table.out");
    loom()
        .arg("asm")
        .arg("tests/files/table.s")
        .arg("-o")
        .arg(&object)
        .arg("-s")
        .assert()
        .success();

    loom()
        .arg("run")
        .arg(&object)
        .arg("--minimal")
        .assert()
        .success()
        .stdout(contains("Value of r2: 137"));

    loom()
        .arg("disasm")
        .arg(&object)
        .assert()
        .success()
        .stdout(contains("0x0000: mov r2, #0"))
        .stdout(contains("0x000c: ldr r5, r3"))
        .stdout(contains("0x001e: jmp #12"));
}

#[test]
fn traces_execution() {
    loom()
        .env("LOOM_TRACE", "1")
        .arg("run")
        .arg("tests/files/sum.s")
        .arg("--minimal")
        .assert()
        .success()
        .stderr(contains("0x0000: mov r0, #10"))
        .stderr(contains("0x0014: hlt"));
}

#[test]
fn rejects_bad_memory_size() {
    loom()
        .arg("run")
        .arg("tests/files/sum.s")
        .arg("--memory")
        .arg("0")
        .assert()
        .failure()
        .stderr(contains("Memory size must be between"));
}
