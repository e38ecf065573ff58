//! End-to-end tests: compile SnuPL/2 source and assert on fragments of the
//! generated assembly.

use snuplc::compile_to_string;

fn compile(src: &str) -> String {
    compile_to_string(src).expect("program should compile")
}

#[test]
fn empty_module() {
    let asm = compile("module M; begin end M.");

    assert!(asm.contains(".global main"));
    assert!(asm.contains("main:"));
    assert!(asm.contains("pushq   %rbx"));
    assert!(asm.contains("andq    $-16, %rsp"));
    assert!(asm.contains("leave"));
    assert!(asm.contains("ret"));
    // no locals: the zeroing loop is skipped
    assert!(!asm.contains("stosq"));
    assert!(asm.contains(".note.GNU-stack"));
    assert!(asm.trim_end().ends_with("##################################################"));
}

#[test]
fn integer_addition_stores_through_eax() {
    let asm = compile("module M; var x: integer; begin x := 1+2 end M.");

    assert!(asm.contains("movq    $1, %rax"));
    assert!(asm.contains("movq    $2, %rbx"));
    assert!(asm.contains("addq    %rbx, %rax"));
    // x is a 4-byte global, stored rip-relative
    assert!(asm.contains("%eax, x(%rip)"));
}

#[test]
fn if_statement_branches_to_suffixed_labels() {
    let asm = compile(
        "module M; var a: integer; begin if (a = 0) then a := 1 else a := 2 end end M.",
    );

    assert!(asm.contains("cmp     %rbx, %rax"));
    assert!(asm.contains("je      l_M_"));
    assert!(asm.contains("_if_true"));
    assert!(asm.contains("_if_false"));
}

#[test]
fn call_passes_first_argument_in_rdi() {
    let asm = compile(
        "module M;
         function f(x: integer): integer;
         begin return x + x end f;
         var y: integer;
         begin y := f(7) end M.",
    );

    assert!(asm.contains("movq    $7, %rdi"));
    assert!(asm.contains("call    f"));
    // the function body label and its exit label
    assert!(asm.contains("f:"));
    assert!(asm.contains("l_f_exit:"));
}

#[test]
fn char_array_store_goes_through_r15() {
    let asm = compile(
        "module M; var s: char[3]; i: integer; begin s[i] := 'a' end M.",
    );

    // the computed element address is fetched into r15, the byte store
    // goes through it
    assert!(asm.contains("%r15"));
    assert!(asm.contains("movb    %al, (%r15)"));
    // the address computation uses the runtime array helpers
    assert!(asm.contains("call    DOFS"));
    assert!(asm.contains(".extern DOFS"));
}

#[test]
fn short_circuit_division_is_guarded() {
    let asm = compile(
        "module M;
         var a, x: integer;
         begin
            if ((a # 0) && (10 / a > 0)) then x := 1 end
         end M.",
    );

    // the a # 0 test must be emitted before the division
    let jne = asm.find("jne").expect("comparison branch");
    let div = asm.find("idivq").expect("division");
    assert!(jne < div);
}

#[test]
fn while_loop_emits_condition_and_body_labels() {
    let asm = compile(
        "module M; var i: integer; begin while (i < 10) do i := i + 1 end end M.",
    );

    assert!(asm.contains("_while_cond"));
    assert!(asm.contains("_while_body"));
    assert!(asm.contains("jl      l_M_"));
}

#[test]
fn global_arrays_carry_their_header() {
    let asm = compile("module M; var a: integer[10]; begin a[0] := 1 end M.");

    assert!(asm.contains("a:"));
    // one dimension of ten elements, then the element data
    assert!(asm.contains(".long   1"));
    assert!(asm.contains(".long   10"));
    assert!(asm.contains(".skip   40"));
}

#[test]
fn two_dimensional_global_pads_its_header() {
    let asm = compile("module M; var a: integer[2][3]; begin a[0][0] := 1 end M.");

    assert!(asm.contains(".long   2"));
    assert!(asm.contains(".long   3"));
    // even dimension count: 4 bytes of pad before the data
    assert!(asm.contains(".skip   4"));
    assert!(asm.contains(".skip   24"));
}

#[test]
fn local_arrays_are_initialized_in_the_prologue() {
    let asm = compile(
        "module M;
         procedure p();
         var a: integer[5];
         begin a[0] := 1 end p;
         begin p() end M.",
    );

    // locals are zeroed, then the header is written in place
    assert!(asm.contains("stosq"));
    assert!(asm.contains("movl    $1, (%rsp)"));
    assert!(asm.contains("movl    $5, 4(%rsp)"));
}

#[test]
fn string_literals_land_in_the_data_section() {
    let asm = compile("module M; begin WriteStr(\"hello\") end M.");

    assert!(asm.contains("_str_1:"));
    assert!(asm.contains(".asciz"));
    assert!(asm.contains("\"hello\""));
    assert!(asm.contains(".extern WriteStr"));
    assert!(asm.contains("call    WriteStr"));
}

#[test]
fn seven_argument_call_spills_into_the_build_area() {
    let asm = compile(
        "module M;
         function f(p1, p2, p3, p4, p5, p6, p7: integer): integer;
         begin return p7 end f;
         var x: integer;
         begin x := f(1, 2, 3, 4, 5, 6, 7) end M.",
    );

    // six register arguments
    for reg in ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"] {
        assert!(asm.contains(reg), "missing argument register {}", reg);
    }
    // the seventh argument goes through rax into the build slot at rsp+0
    assert!(asm.contains("movq    $7, %rax"));
    // and the callee reads it from above its saved registers
    assert!(asm.contains("56(%rbp)"));
}

#[test]
fn longint_values_use_quadword_stores() {
    let asm = compile("module M; var l: longint; begin l := 1L + 2L end M.");

    assert!(asm.contains("%rax, l(%rip)"));
}

#[test]
fn subroutines_are_emitted_before_the_module_body() {
    let asm = compile(
        "module M;
         procedure p();
         begin return end p;
         begin p() end M.",
    );

    let p = asm.find("\np:").expect("procedure label");
    let main = asm.find("\nmain:").expect("module label");
    assert!(p < main);
}

#[test]
fn compile_errors_carry_positions() {
    let err = compile_to_string("module M; begin x := 1 end M.").unwrap_err();
    let msg = err.to_string();
    // line:col: message
    assert!(msg.starts_with("1:17:"), "unexpected message: {}", msg);
    assert!(msg.contains("undeclared identifier"));
}

#[test]
fn semantic_errors_stop_the_pipeline() {
    let err = compile_to_string("module M; var x: integer; begin x := true end M.").unwrap_err();
    assert!(err.to_string().contains("incompatible types"));
}

#[test]
fn output_is_deterministic() {
    let src = "module M;
        var a: integer[4]; i: integer;
        function sum(n: integer): integer;
        var s, k: integer;
        begin
            s := 0; k := 0;
            while (k < n) do s := s + a[k]; k := k + 1 end;
            return s
        end sum;
        begin
            i := 0;
            while (i < 4) do a[i] := i; i := i + 1 end;
            WriteInt(sum(4)); WriteLn()
        end M.";

    let a = compile(src);
    let b = compile(src);
    assert_eq!(a, b);
}

#[test]
fn factorial_program_compiles_end_to_end() {
    let asm = compile(
        "module fac;
         function fact(n: integer): integer;
         begin
            if (n <= 1) then return 1 end;
            return n * fact(n - 1)
         end fact;
         begin
            WriteInt(fact(10));
            WriteLn()
         end fac.",
    );

    assert!(asm.contains("fact:"));
    assert!(asm.contains("call    fact"));
    assert!(asm.contains("imulq   %rbx"));
    assert!(asm.contains("call    WriteInt"));
}
