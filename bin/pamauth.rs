fn main() {
    pam_bridge::pamauth_main();
}
