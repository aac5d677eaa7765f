use chronostore_native::pg_magic_func;

fn main() {
    pgrx::pgrx_embed!(pg_magic_func);
}
