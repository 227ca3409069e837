// Full RELRO and a non-executable stack for the shared object, on top of the
// PIC and stack probes rustc emits.
const HARDENING: [&str; 3] = ["-Wl,-z,relro", "-Wl,-z,now", "-Wl,-z,noexecstack"];

fn main() {
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    unimplemented!("`perf_event_open` syscall can only be used in linux or android target");

    println!("cargo:rerun-if-changed=build/main.rs");
    println!("cargo:rerun-if-changed=include/pgos.h");

    for arg in HARDENING {
        println!("cargo:rustc-cdylib-link-arg={}", arg);
    }
}
