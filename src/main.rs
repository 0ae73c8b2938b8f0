use woffle::compress_woff2;
use woffle::decompress_woff2;

fn main() {
    let mut args = std::env::args();
    let infile = args.nth(1).unwrap();
    let outfile = args.next().unwrap();

    println!("Reading from {infile}");
    let input = std::fs::read(&infile).unwrap();

    let output = if infile.ends_with("woff2") {
        println!("Decoding woff2");
        decompress_woff2(&input).unwrap()
    } else {
        println!("Encoding woff2");
        compress_woff2(&input).unwrap()
    };

    println!("Writing to {outfile}");
    std::fs::write(outfile, output).unwrap();
}
