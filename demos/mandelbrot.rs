// Renders a few frames of a zooming mandelbrot fractal as ascii art.
// The same kernel object and queue are reused for every frame.

use sico::{
    ComputeRegistry, Error, Kernel, KernelSource, Parameter, Queue,
    devices::host::{HostDevice, HostRuntime, KernelArgs, KernelFault, WorkItem},
    dispatch::run_2d,
};

const WIDTH: usize = 78;
const HEIGHT: usize = 28;
const FRAMES: usize = 3;
const SHADES: &[u8] = b" .:-=+*#%@";

fn mandelbrot(item: &WorkItem, args: &KernelArgs<'_>) -> Result<(), KernelFault> {
    let (x, y) = (item.global_id(0), item.global_id(1));
    let (width, height) = (item.global_size(0), item.global_size(1));
    let time = args.value::<f32>(1)?;

    let zoom = 1. + 0.5 * time.sin();
    let cr = (x as f32 / width as f32 * 3.5 - 2.5) / zoom;
    let ci = (y as f32 / height as f32 * 2. - 1.) / zoom;

    let (mut zr, mut zi) = (0f32, 0f32);
    let mut iter = 0u32;
    while zr * zr + zi * zi < 4. && iter < 255 {
        let t = zr * zr - zi * zi + cr;
        zi = 2. * zr * zi + ci;
        zr = t;
        iter += 1;
    }

    args.store(0, y * width + x, iter)
}

fn main() -> Result<(), Error> {
    let runtime = HostRuntime::builder()
        .platform("sico host", [HostDevice::gpu("Host GPU")])
        .kernel("kern", mandelbrot)
        .build();
    let registry = ComputeRegistry::open(runtime)?;
    let device = registry.select_best_device()?;

    let source = KernelSource::from_file(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/demos/kernels/mandelbrot.cl"
    ))?;
    let kernel = Kernel::compile(&registry, device, &source, "kern", "")?;
    let queue = Queue::new(&registry, device)?;

    let mut pixels = vec![0u32; WIDTH * HEIGHT];
    let mut time = 0f32;

    for _ in 0..FRAMES {
        let mut params = [Parameter::read_write(&mut pixels), Parameter::scalar(&time)];
        run_2d(device, &kernel, &queue, &mut params, [WIDTH, HEIGHT], None)?;

        for row in pixels.chunks(WIDTH) {
            let line = row
                .iter()
                .map(|&iter| SHADES[iter as usize * (SHADES.len() - 1) / 255] as char)
                .collect::<String>();
            println!("{line}");
        }
        println!();

        time += 0.5;
    }

    queue.destroy()?;
    kernel.release()?;
    registry.close()
}
