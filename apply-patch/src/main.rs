fn main() -> ! {
    loaf_apply_patch::main()
}
